//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "PLC to MQTT bridge")]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .get_matches();

        <Self as clap::FromArgMatches>::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }
}
