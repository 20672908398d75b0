//! Configuration traits and shared configuration types.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address.
    #[serde(default)]
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Optional user name, passed through to the broker.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password, passed through to the broker.
    #[serde(default)]
    pub password: Option<String>,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Base topic for state, command and status topics.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Home Assistant discovery prefix.
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Delay between reconnection attempts in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Timeout for the connection handshake in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "plc-mqtt-bridge".to_string()
}

fn default_base_topic() -> String {
    "plc".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    30000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            discovery_prefix: default_discovery_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl MqttConfig {
    /// Copy of this configuration that is safe to log.
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "****".to_string()),
            ..self.clone()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate the broker settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BridgeError::validation("mqtt.host cannot be empty"));
        }
        if self.port == 0 {
            return Err(BridgeError::validation("mqtt.port must be non-zero"));
        }
        if self.client_id.is_empty() {
            return Err(BridgeError::validation("mqtt.client_id cannot be empty"));
        }
        for (field, topic) in [
            ("mqtt.base_topic", &self.base_topic),
            ("mqtt.discovery_prefix", &self.discovery_prefix),
        ] {
            if topic.is_empty() {
                return Err(BridgeError::validation(format!("{field} cannot be empty")));
            }
            if topic.contains(['+', '#']) {
                return Err(BridgeError::validation(format!(
                    "{field} '{topic}' must not contain MQTT wildcards"
                )));
            }
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Trait for bridge configuration types.
///
/// Implement this trait for a bridge configuration struct to get JSON5
/// loading, environment overrides and validation.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use foxbridge_framework::{BridgeConfig, LoggingConfig, MqttConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub mqtt: MqttConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn mqtt(&self) -> &MqttConfig {
///         &self.mqtt
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the MQTT broker configuration.
    fn mqtt(&self) -> &MqttConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        self.mqtt().validate()
    }

    /// Apply overrides from a key lookup (normally the process environment).
    fn apply_env<F>(&mut self, _lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(())
    }

    /// Parse configuration from a JSON5 string without validating it.
    fn parse(content: &str) -> Result<Self> {
        Ok(json5::from_str(content)?)
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Environment overrides are applied before
    /// [`validate`](Self::validate) is called.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a file if it exists, otherwise from defaults
    /// and the environment alone.
    fn load_or_env(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        tracing::info!(
            path = %path.display(),
            "Configuration file not found, using environment"
        );

        let mut config = Self::parse("{}")?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }
}
