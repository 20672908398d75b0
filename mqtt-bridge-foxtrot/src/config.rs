//! Configuration for the Foxtrot bridge.

use foxbridge_framework::{BridgeConfig, BridgeError, LoggingConfig, MqttConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Characters a variable name cannot contain: they would break either the
/// controller line protocol or MQTT topic construction.
const FORBIDDEN_NAME_CHARS: [char; 6] = [',', ':', '+', '#', '\r', '\n'];

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoxtrotBridgeConfig {
    /// Controller (PLC) connection settings
    #[serde(default)]
    pub controller: ControllerConfig,

    /// MQTT broker settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Device metadata shared by all discovered sensors
    #[serde(default)]
    pub device: DeviceConfig,

    /// Variables to poll
    #[serde(default)]
    pub variables: Vec<VariableConfig>,

    /// Interval of the connection status heartbeat in seconds
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_status_interval() -> u64 {
    30
}

/// Controller connection and polling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Host address (IP or hostname)
    #[serde(default)]
    pub host: String,

    /// TCP port
    #[serde(default)]
    pub port: u16,

    /// Minimum time between two read requests for one variable, also the
    /// poll tick period, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Period of the reconnect watchdog in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Timeout of a single connection attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    /// `host:port` address of the controller.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Device metadata used to group all sensors in Home Assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier
    #[serde(default = "default_device_identifier")]
    pub identifier: String,

    /// Display name of the device
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Manufacturer shown in Home Assistant
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
}

fn default_device_identifier() -> String {
    "plc_foxtrot_bridge".to_string()
}

fn default_device_name() -> String {
    "PLC Foxtrot Bridge".to_string()
}

fn default_manufacturer() -> String {
    "Custom Integration".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            identifier: default_device_identifier(),
            name: default_device_name(),
            manufacturer: default_manufacturer(),
        }
    }
}

/// Configuration for a single controller variable.
///
/// The camelCase aliases accept the variable list format of the `VARIABLES`
/// environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Variable name, also the key on the controller wire protocol
    pub name: String,

    /// Declared data type (informational)
    #[serde(rename = "type", default)]
    pub data_type: Option<String>,

    /// Unit of measurement
    #[serde(default, alias = "unitOfMeasurement")]
    pub unit_of_measurement: Option<String>,

    /// Integrate this variable into an energy total
    #[serde(default, alias = "calculateEnergy")]
    pub calculate_energy: bool,
}

impl VariableConfig {
    /// Create a variable with a unit and no energy tracking.
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            unit_of_measurement: Some(unit.into()),
            calculate_energy: false,
        }
    }

    /// Enable energy integration for this variable.
    pub fn with_energy(mut self) -> Self {
        self.calculate_energy = true;
        self
    }
}

impl FoxtrotBridgeConfig {
    /// Copy of this configuration that is safe to log.
    pub fn redacted(&self) -> Self {
        Self {
            mqtt: self.mqtt.redacted(),
            ..self.clone()
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

impl BridgeConfig for FoxtrotBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PLC_HOST") {
            self.controller.host = host;
        }
        if let Some(port) = lookup("PLC_PORT") {
            self.controller.port = parse_env("PLC_PORT", &port)?;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = parse_env("MQTT_PORT", &port)?;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.mqtt.username = Some(user);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(topic) = lookup("MQTT_TOPIC") {
            self.mqtt.base_topic = topic;
        }
        if let Some(variables) = lookup("VARIABLES") {
            self.variables = serde_json::from_str(&variables).map_err(|e| {
                BridgeError::validation(format!("VARIABLES is not a valid variable list: {e}"))
            })?;
        }
        if let Some(secs) = lookup("REFRESH_INTERVAL") {
            let secs: u64 = parse_env("REFRESH_INTERVAL", &secs)?;
            self.controller.poll_interval_ms = secs.saturating_mul(1000);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;

        if self.controller.host.is_empty() {
            return Err(BridgeError::validation("controller.host cannot be empty"));
        }
        if self.controller.port == 0 {
            return Err(BridgeError::validation("controller.port must be non-zero"));
        }
        if self.controller.poll_interval_ms == 0 {
            return Err(BridgeError::validation(
                "controller.poll_interval_ms must be non-zero",
            ));
        }
        if self.controller.reconnect_interval_ms == 0 {
            return Err(BridgeError::validation(
                "controller.reconnect_interval_ms must be non-zero",
            ));
        }
        if self.status_interval_secs == 0 {
            return Err(BridgeError::validation(
                "status_interval_secs must be non-zero",
            ));
        }
        if self.variables.is_empty() {
            return Err(BridgeError::validation(
                "At least one variable must be configured",
            ));
        }

        let mut seen = HashSet::new();
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                return Err(BridgeError::validation("Variable name cannot be empty"));
            }
            if variable.name.contains(FORBIDDEN_NAME_CHARS) {
                return Err(BridgeError::validation(format!(
                    "Variable '{}': name must not contain any of {:?}",
                    variable.name, FORBIDDEN_NAME_CHARS
                )));
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Variable '{}' is configured more than once",
                    variable.name
                )));
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::validation(format!("{key}='{value}' is not a valid number")))
}
