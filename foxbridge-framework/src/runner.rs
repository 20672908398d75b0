//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;

use crate::BridgeArgs;
use crate::config::{BridgeConfig, LoggingConfig};
use crate::error::{BridgeError, Result};
use crate::init_tracing;

/// How long a worker gets to wind down after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Receiver side of the shutdown signal handed to workers.
///
/// The value flips to `true` once shutdown has been requested.
pub type Shutdown = watch::Receiver<bool>;

/// Bridge runner that manages the lifecycle of a protocol bridge.
///
/// Handles:
/// - Logging initialization
/// - Running the bridge worker
/// - Graceful shutdown on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use foxbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///     let shutdown = runner.shutdown_signal();
///     runner.run(my_worker(shutdown)).await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Shutdown broadcast.
    shutdown_tx: watch::Sender<bool>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner and initialize logging from the config.
    ///
    /// A log level given on the command line overrides the configured one.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = effective_logging(config.logging(), args);
        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            name,
            version,
            config,
            shutdown_tx,
        })
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown_tx.subscribe()
    }

    /// Run the bridge worker until it finishes or Ctrl+C is received.
    ///
    /// On Ctrl+C the shutdown signal is raised and the worker gets a short
    /// grace period to publish its offline status before it is dropped.
    pub async fn run<F>(self, worker: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::pin!(worker);

        tracing::info!(bridge = %self.name, "Bridge running. Press Ctrl+C to stop.");

        let result = tokio::select! {
            result = &mut worker => result,
            signal = signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
                tracing::info!(bridge = %self.name, "Received shutdown signal");
                self.shutdown_tx.send_replace(true);

                match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(bridge = %self.name, "Worker did not stop in time");
                        Ok(())
                    }
                }
            }
        };

        tracing::info!(bridge = %self.name, "Goodbye!");

        result
    }
}

fn effective_logging(config: &LoggingConfig, args: Option<&BridgeArgs>) -> LoggingConfig {
    match args.and_then(|args| args.log_level.as_ref()) {
        Some(level) => LoggingConfig {
            level: level.clone(),
            format: config.format,
        },
        None => config.clone(),
    }
}
