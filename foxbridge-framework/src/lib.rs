//! Foxbridge Framework
//!
//! Common abstractions for building bridges that publish controller telemetry to MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading, environment overrides and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (logging, signal handling)
//! - [`BrokerClient`] as the publish/subscribe seam over the MQTT client
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use foxbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!     let shutdown = runner.shutdown_signal();
//!
//!     // Run until Ctrl+C
//!     runner.run(my_worker(shutdown)).await?;
//!     Ok(())
//! }
//! ```

mod args;
pub mod client;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use client::Will;
pub use config::{BridgeConfig, LogFormat, LoggingConfig, MqttConfig};
pub use error::{BridgeError, Result};
pub use publisher::{BrokerClient, PublishOutcome, PublishStats};
pub use runner::{BridgeRunner, Shutdown};
pub use status::BridgeStatus;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
