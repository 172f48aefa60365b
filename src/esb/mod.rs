//! Streaming bridge between the cluster and the external file server
//! (spec.md §4.5).

mod multipart;
mod server;

pub use server::run;
