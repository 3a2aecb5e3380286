use anyhow::Result;
use clap::Args;
use perp_sentinel_core::ConfigLoader;

/// Arguments for the check-config command.
#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Sentinel.toml")]
    pub config: String,
}

/// Loads the file plus `SENTINEL_` overrides and prints the merged result.
pub fn run(args: CheckConfigArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    eprintln!("Configuration OK ({})", args.config);
    Ok(())
}
