pub mod agents;
pub mod bootstrap;
pub mod callback;
pub mod config;
pub mod envelope;
pub mod esb;
pub mod gateway;
pub mod jobs;
pub mod kv;
pub mod observability;
pub mod orchestrator;
pub mod routing;
pub mod staging;
