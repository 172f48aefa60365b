mod cli;

use agentmesh::{esb, gateway, observability, orchestrator};
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway(args) => {
            observability::init_logging("gateway");
            gateway::run(args.address).await?
        }
        Commands::Orchestrator(args) => {
            observability::init_logging("orchestrator");
            orchestrator::run(args.address).await?
        }
        Commands::Esb(args) => {
            observability::init_logging("esb");
            esb::run(args.address).await?
        }
    }

    Ok(())
}
