use clap::{Parser, Subcommand};

mod commands;
mod signal_file;

use commands::{CheckConfigArgs, RunArgs, SizeArgs};

#[derive(Parser)]
#[command(name = "perp-sentinel")]
#[command(about = "Position lifecycle and risk control engine for leveraged perpetuals", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against paper execution until Ctrl-C
    Run(RunArgs),
    /// Preview the entry size for a hypothetical signal
    Size(SizeArgs),
    /// Load, validate and print the effective configuration
    CheckConfig(CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run_engine(args).await?,
        Commands::Size(args) => commands::run_size(args)?,
        Commands::CheckConfig(args) => commands::run_check_config(args)?,
    }

    Ok(())
}
