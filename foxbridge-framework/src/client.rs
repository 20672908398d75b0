//! MQTT client construction.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};

use crate::config::MqttConfig;

/// Capacity of the client's outgoing request queue.
pub const REQUEST_CAPACITY: usize = 256;

/// A retained message the broker publishes if the bridge vanishes.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Build the MQTT options for a broker configuration.
pub fn mqtt_options(config: &MqttConfig, will: Option<Will>) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    if let Some(will) = will {
        options.set_last_will(LastWill::new(
            will.topic,
            will.payload,
            QoS::AtLeastOnce,
            true,
        ));
    }

    options
}

/// Create an MQTT client and its event loop.
///
/// Nothing touches the network until the event loop is polled.
pub fn connect(config: &MqttConfig, will: Option<Will>) -> (AsyncClient, EventLoop) {
    tracing::info!(
        host = %config.host,
        port = config.port,
        client_id = %config.client_id,
        "Creating MQTT client"
    );

    AsyncClient::new(mqtt_options(config, will), REQUEST_CAPACITY)
}
