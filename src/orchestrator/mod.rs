//! Stateless job engine: idempotent agent invocation, file staging via the
//! ESB, pluggable handlers, and terminal-state callbacks (spec.md §4.3,
//! §4.6-§4.8).

mod agent_configs;
mod proxy;
mod server;
pub mod state;

pub use server::{app, run};
