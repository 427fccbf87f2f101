mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "syncbridge",
    version,
    about = "Mediate data-movement syncs between connector processes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync between a source and a destination connector
    Run {
        /// Path to sync YAML file
        sync: PathBuf,
    },
    /// Resolve and validate a catalog file without running anything
    CheckCatalog {
        /// Path to catalog JSON file
        catalog: PathBuf,
        /// Treat the file as a freshly discovered catalog and print the
        /// user-facing shape with inferred default modes
        #[arg(long)]
        discovered: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { sync } => commands::run::execute(&sync).await,
        Commands::CheckCatalog {
            catalog,
            discovered,
        } => commands::check_catalog::execute(&catalog, discovered),
    }
}
