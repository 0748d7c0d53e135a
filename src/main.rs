use clap::{Parser, Subcommand};
use std::path::PathBuf;

use proctor_relay::config::RelayConfig;
use proctor_relay::serve::{init_db, serve};

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time exam proctoring relay")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the database schema and exit
    InitDb {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Serve { config, port } => serve(RelayConfig::load(&config)?, port),
        Command::InitDb { config } => init_db(&RelayConfig::load(&config)?),
    }
}
