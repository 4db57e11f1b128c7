pub mod commands;
pub mod status;

use clap::Parser;
use commands::Commands;
use log::error;
use shared::{env, logger};

/// Watch renders stream in, or stream a test render.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    env::init();
    logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server(args) => commands::server::run(args).await,
        Commands::Client(args) => commands::client::run(args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
