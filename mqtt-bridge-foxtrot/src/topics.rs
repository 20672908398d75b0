//! MQTT topic construction.

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
///
/// Used for discovery topics and unique ids, where Home Assistant only
/// accepts word characters.
///
/// # Example
/// ```
/// use mqtt_bridge_foxtrot::topics::sanitize_name;
///
/// assert_eq!(sanitize_name("TR.P[1]"), "TR_P_1_");
/// ```
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builder for the bridge's topics.
///
/// State and command topics use the raw variable name under the base topic:
/// `<base>/<name>/state`, `<base>/<name>/energy/state`, `<base>/<name>/set`.
/// Discovery topics use the sanitized name under the discovery prefix:
/// `<prefix>/sensor/<sanitized>/config`.
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    base: String,
    discovery_prefix: String,
}

impl TopicBuilder {
    pub fn new(base: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            discovery_prefix: discovery_prefix.into(),
        }
    }

    /// # Example
    /// ```
    /// use mqtt_bridge_foxtrot::topics::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("plc", "homeassistant");
    /// assert_eq!(topics.state("P_total"), "plc/P_total/state");
    /// ```
    pub fn state(&self, name: &str) -> String {
        format!("{}/{}/state", self.base, name)
    }

    pub fn energy_state(&self, name: &str) -> String {
        format!("{}/{}/energy/state", self.base, name)
    }

    pub fn command(&self, name: &str) -> String {
        format!("{}/{}/set", self.base, name)
    }

    /// Map a command topic back to its variable name.
    pub fn command_variable<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?
            .strip_suffix("/set")
            .filter(|name| !name.is_empty())
    }

    pub fn status(&self) -> String {
        format!("{}/bridge/status", self.base)
    }

    pub fn sensor_discovery(&self, name: &str) -> String {
        format!(
            "{}/sensor/{}/config",
            self.discovery_prefix,
            sanitize_name(name)
        )
    }

    pub fn energy_discovery(&self, name: &str) -> String {
        format!(
            "{}/sensor/{}_energy/config",
            self.discovery_prefix,
            sanitize_name(name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("P_total"), "P_total");
        assert_eq!(sanitize_name("TR.P[1]"), "TR_P_1_");
        assert_eq!(sanitize_name("teplota kotle"), "teplota_kotle");
        assert_eq!(sanitize_name("výkon"), "v_kon");
    }

    #[test]
    fn test_topics() {
        let topics = TopicBuilder::new("plc", "homeassistant");

        assert_eq!(topics.state("TR.P[1]"), "plc/TR.P[1]/state");
        assert_eq!(topics.energy_state("P1"), "plc/P1/energy/state");
        assert_eq!(topics.command("P1"), "plc/P1/set");
        assert_eq!(topics.status(), "plc/bridge/status");
        assert_eq!(
            topics.sensor_discovery("TR.P[1]"),
            "homeassistant/sensor/TR_P_1_/config"
        );
        assert_eq!(
            topics.energy_discovery("TR.P[1]"),
            "homeassistant/sensor/TR_P_1__energy/config"
        );
    }

    #[test]
    fn test_command_variable() {
        let topics = TopicBuilder::new("plc/house", "homeassistant");

        assert_eq!(topics.command_variable("plc/house/P1/set"), Some("P1"));
        assert_eq!(topics.command_variable("plc/house/P1/state"), None);
        assert_eq!(topics.command_variable("plc/house//set"), None);
        assert_eq!(topics.command_variable("other/P1/set"), None);
    }
}
