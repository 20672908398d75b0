//! Home Assistant MQTT discovery descriptors.

use serde::{Deserialize, Serialize};

use crate::config::{DeviceConfig, VariableConfig};
use crate::registry::VariableRegistry;
use crate::topics::{TopicBuilder, sanitize_name};

/// Device block shared by every sensor of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
}

impl From<&DeviceConfig> for DiscoveryDevice {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            identifiers: vec![config.identifier.clone()],
            name: config.name.clone(),
            manufacturer: config.manufacturer.clone(),
        }
    }
}

/// Discovery payload of one sensor entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDiscovery {
    pub name: String,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    pub unique_id: String,
    pub device: DiscoveryDevice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    pub state_class: String,
}

/// A retained discovery message ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub config: SensorDiscovery,
}

/// Best-effort Home Assistant device class for a unit of measurement.
pub fn device_class_for_unit(unit: &str) -> Option<&'static str> {
    match unit {
        "kW" | "W" | "MW" | "GW" => Some("power"),
        "°C" | "℃" => Some("temperature"),
        "h" | "min" | "s" => Some("duration"),
        "%" => Some("humidity"),
        "V" => Some("voltage"),
        "A" => Some("current"),
        _ => None,
    }
}

/// Builds the discovery messages for the configured variables.
///
/// The output depends only on configuration, so re-publishing on every
/// broker reconnect yields identical retained messages.
#[derive(Debug, Clone)]
pub struct DiscoveryPublisher {
    topics: TopicBuilder,
    device: DiscoveryDevice,
}

impl DiscoveryPublisher {
    pub fn new(topics: TopicBuilder, device: &DeviceConfig) -> Self {
        Self {
            topics,
            device: device.into(),
        }
    }

    /// Descriptor of the measurement sensor of a variable.
    pub fn sensor(&self, variable: &VariableConfig) -> DiscoveryMessage {
        let sanitized = sanitize_name(&variable.name);
        let device_class = variable
            .unit_of_measurement
            .as_deref()
            .and_then(device_class_for_unit)
            .map(str::to_string);

        DiscoveryMessage {
            topic: self.topics.sensor_discovery(&variable.name),
            config: SensorDiscovery {
                name: variable.name.clone(),
                state_topic: self.topics.state(&variable.name),
                unit_of_measurement: variable.unit_of_measurement.clone(),
                unique_id: format!("plc_{sanitized}_sensor"),
                device: self.device.clone(),
                device_class,
                state_class: "measurement".to_string(),
            },
        }
    }

    /// Descriptor of the synthetic energy sensor of a variable.
    pub fn energy_sensor(&self, variable: &VariableConfig) -> DiscoveryMessage {
        let sanitized = sanitize_name(&variable.name);

        DiscoveryMessage {
            topic: self.topics.energy_discovery(&variable.name),
            config: SensorDiscovery {
                name: format!("{} Energy", variable.name),
                state_topic: self.topics.energy_state(&variable.name),
                unit_of_measurement: Some("kWh".to_string()),
                unique_id: format!("plc_{sanitized}_energy"),
                device: self.device.clone(),
                device_class: Some("energy".to_string()),
                state_class: "total_increasing".to_string(),
            },
        }
    }

    /// All discovery messages, in configuration order.
    pub fn messages(&self, registry: &VariableRegistry) -> Vec<DiscoveryMessage> {
        registry
            .iter()
            .flat_map(|variable| {
                let energy = variable
                    .calculate_energy
                    .then(|| self.energy_sensor(variable));
                std::iter::once(self.sensor(variable)).chain(energy)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> DiscoveryPublisher {
        DiscoveryPublisher::new(
            TopicBuilder::new("plc", "homeassistant"),
            &DeviceConfig::default(),
        )
    }

    #[test]
    fn test_device_class_lookup() {
        assert_eq!(device_class_for_unit("kW"), Some("power"));
        assert_eq!(device_class_for_unit("GW"), Some("power"));
        assert_eq!(device_class_for_unit("℃"), Some("temperature"));
        assert_eq!(device_class_for_unit("min"), Some("duration"));
        assert_eq!(device_class_for_unit("%"), Some("humidity"));
        assert_eq!(device_class_for_unit("V"), Some("voltage"));
        assert_eq!(device_class_for_unit("A"), Some("current"));
        assert_eq!(device_class_for_unit("kWh"), None);
        assert_eq!(device_class_for_unit("bar"), None);
    }

    #[test]
    fn test_sensor_payload() {
        let message = publisher().sensor(&VariableConfig::new("TR.P[1]", "kW"));

        assert_eq!(message.topic, "homeassistant/sensor/TR_P_1_/config");

        let json = serde_json::to_value(&message.config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "TR.P[1]",
                "state_topic": "plc/TR.P[1]/state",
                "unit_of_measurement": "kW",
                "unique_id": "plc_TR_P_1__sensor",
                "device": {
                    "identifiers": ["plc_foxtrot_bridge"],
                    "name": "PLC Foxtrot Bridge",
                    "manufacturer": "Custom Integration"
                },
                "device_class": "power",
                "state_class": "measurement"
            })
        );
    }

    #[test]
    fn test_unmapped_unit_omits_device_class() {
        let message = publisher().sensor(&VariableConfig::new("Pressure", "bar"));
        let json = serde_json::to_value(&message.config).unwrap();

        assert!(json.get("device_class").is_none());
        assert_eq!(json["unit_of_measurement"], "bar");
    }

    #[test]
    fn test_energy_sensor_payload() {
        let message = publisher().energy_sensor(&VariableConfig::new("P1", "kW").with_energy());

        assert_eq!(message.topic, "homeassistant/sensor/P1_energy/config");
        assert_eq!(message.config.name, "P1 Energy");
        assert_eq!(message.config.state_topic, "plc/P1/energy/state");
        assert_eq!(message.config.unit_of_measurement.as_deref(), Some("kWh"));
        assert_eq!(message.config.device_class.as_deref(), Some("energy"));
        assert_eq!(message.config.state_class, "total_increasing");
        assert_eq!(message.config.unique_id, "plc_P1_energy");
    }

    #[test]
    fn test_messages_include_energy_sensors() {
        let registry = VariableRegistry::new(vec![
            VariableConfig::new("P1", "kW").with_energy(),
            VariableConfig::new("T1", "°C"),
        ]);

        let topics: Vec<String> = publisher()
            .messages(&registry)
            .into_iter()
            .map(|m| m.topic)
            .collect();

        assert_eq!(
            topics,
            vec![
                "homeassistant/sensor/P1/config",
                "homeassistant/sensor/P1_energy/config",
                "homeassistant/sensor/T1/config",
            ]
        );
    }

    #[test]
    fn test_messages_are_stable() {
        let registry = VariableRegistry::new(vec![VariableConfig::new("P1", "kW").with_energy()]);
        let publisher = publisher();
        assert_eq!(publisher.messages(&registry), publisher.messages(&registry));
    }
}
