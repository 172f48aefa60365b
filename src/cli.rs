use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "agentmesh")]
#[command(about = "Gateway, orchestrator, and ESB for the agent mesh", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the authenticated reverse-proxy gateway
    Gateway(ServiceArgs),

    /// Run the stateless job orchestrator
    Orchestrator(ServiceArgs),

    /// Run the ESB file-server bridge
    Esb(ServiceArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServiceArgs {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub address: SocketAddr,
}
