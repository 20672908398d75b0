//! The bridge's single control loop.
//!
//! [`BridgeCoordinator`] owns both links and all runtime state. Controller
//! data, broker events and the three timers (status heartbeat, controller
//! watchdog, poll tick) are arms of one `select!`, so every event is handled
//! to completion before the next one.

use std::time::Duration;

use foxbridge_framework::{BridgeStatus, BrokerClient, Result, Shutdown};
use rumqttc::AsyncClient;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::FoxtrotBridgeConfig;
use crate::controller::{ControllerEvent, ControllerLink, ControllerSignal};
use crate::discovery::DiscoveryPublisher;
use crate::messaging::{MessagingEvent, MessagingLink, format_value};
use crate::protocol::{Response, ResponseParser, get_request};
use crate::registry::VariableRegistry;
use crate::runtime::RuntimeState;
use crate::scheduler::PollScheduler;
use crate::topics::TopicBuilder;

/// Name reported in the bridge status document.
pub const BRIDGE_NAME: &str = "foxtrot";

const CONTROLLER_EVENT_CAPACITY: usize = 64;

/// Wall-clock milliseconds derived from the monotonic clock.
///
/// Anchoring once at startup keeps request pacing and energy integration
/// immune to wall-clock steps.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ms: i64,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn at(&self, instant: Instant) -> i64 {
        let elapsed = instant.saturating_duration_since(self.origin).as_millis();
        self.origin_ms
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }

    fn now(&self) -> i64 {
        self.at(Instant::now())
    }
}

/// Periods of the coordinator's timers.
#[derive(Debug, Clone, Copy)]
struct Timers {
    status: Duration,
    watchdog: Duration,
    poll: Duration,
}

/// Owns the links and runtime state and routes events between them.
pub struct BridgeCoordinator<C: BrokerClient = AsyncClient> {
    parser: ResponseParser,
    runtime: RuntimeState,
    scheduler: PollScheduler,
    topics: TopicBuilder,
    discovery: DiscoveryPublisher,
    controller: ControllerLink,
    controller_events: mpsc::Receiver<ControllerEvent>,
    messaging: MessagingLink<C>,
    messaging_events: mpsc::Receiver<MessagingEvent>,
    timers: Timers,
    clock: Clock,
}

impl<C: BrokerClient> BridgeCoordinator<C> {
    /// Build a coordinator from validated configuration.
    ///
    /// `messaging_events` is fed by the MQTT event loop task driving the
    /// connection behind `client`.
    pub fn new(
        config: &FoxtrotBridgeConfig,
        client: C,
        messaging_events: mpsc::Receiver<MessagingEvent>,
    ) -> Self {
        let (controller_tx, controller_events) = mpsc::channel(CONTROLLER_EVENT_CAPACITY);
        let topics = TopicBuilder::new(&config.mqtt.base_topic, &config.mqtt.discovery_prefix);

        Self {
            parser: ResponseParser::new(VariableRegistry::new(config.variables.clone())),
            runtime: RuntimeState::new(),
            scheduler: PollScheduler::new(config.controller.poll_interval()),
            discovery: DiscoveryPublisher::new(topics.clone(), &config.device),
            topics,
            controller: ControllerLink::new(
                config.controller.address(),
                config.controller.connect_timeout(),
                controller_tx,
            ),
            controller_events,
            messaging: MessagingLink::new(client),
            messaging_events,
            timers: Timers {
                status: config.status_interval(),
                watchdog: config.controller.reconnect_interval(),
                poll: config.controller.poll_interval(),
            },
            clock: Clock::start(),
        }
    }

    pub fn registry(&self) -> &VariableRegistry {
        self.parser.registry()
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    pub fn controller(&self) -> &ControllerLink {
        &self.controller
    }

    pub fn messaging(&self) -> &MessagingLink<C> {
        &self.messaging
    }

    /// Run until shutdown is requested.
    ///
    /// Publishes an offline status on the way out when the broker is
    /// connected.
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        let mut status_timer = interval_after(self.timers.status);
        let mut watchdog = timer(tokio::time::interval(self.timers.watchdog));
        let mut poll_timer = timer(tokio::time::interval(self.timers.poll));

        tracing::info!(
            controller = %self.controller.address(),
            variables = self.registry().len(),
            poll_interval_ms = self.timers.poll.as_millis() as u64,
            "Coordinator started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(event) = self.controller_events.recv() => {
                    let now_ms = self.clock.now();
                    self.handle_controller_event(event, now_ms);
                }
                Some(event) = self.messaging_events.recv() => {
                    self.handle_messaging_event(event);
                }
                tick = poll_timer.tick() => {
                    let now_ms = self.clock.at(tick);
                    self.poll(now_ms);
                }
                _ = watchdog.tick() => {
                    self.watchdog();
                }
                _ = status_timer.tick() => {
                    self.log_status();
                }
            }
        }

        tracing::info!("Coordinator stopping");
        if self.messaging.is_connected() {
            let status = BridgeStatus::offline(BRIDGE_NAME, env!("CARGO_PKG_VERSION"))
                .with_metadata(self.status_metadata());
            let _ = self.messaging.publish_json(&self.topics.status(), &status);
        }

        Ok(())
    }

    /// Start a controller connection attempt if the link is down.
    pub fn watchdog(&mut self) {
        if self.controller.connect() {
            tracing::debug!("Watchdog started a controller connection attempt");
        }
    }

    /// Apply an event from the controller link.
    pub fn handle_controller_event(&mut self, event: ControllerEvent, now_ms: i64) {
        match self.controller.on_event(event) {
            ControllerSignal::Connected => {
                // Fresh connection: every variable is due on the next tick.
                self.runtime.clear_request_times();
            }
            ControllerSignal::Lines(lines) => {
                for line in &lines {
                    self.handle_line(line, now_ms);
                }
            }
            ControllerSignal::Disconnected | ControllerSignal::Ignored => {}
        }
    }

    /// Apply an event from the MQTT event loop.
    pub fn handle_messaging_event(&mut self, event: MessagingEvent) {
        self.messaging.on_event(&event);

        match event {
            MessagingEvent::Connected => self.announce(),
            MessagingEvent::Command { topic, payload } => {
                match self.topics.command_variable(&topic) {
                    Some(name) if self.registry().contains(name) => {
                        self.on_command(name, &payload);
                    }
                    _ => tracing::debug!(topic = %topic, "Ignoring message on unexpected topic"),
                }
            }
            MessagingEvent::Connecting | MessagingEvent::Disconnected(_) => {}
        }
    }

    /// Process one decoded controller line received at `now_ms`.
    pub fn handle_line(&mut self, line: &str, now_ms: i64) {
        match self.parser.parse(line) {
            Ok(Response::Measurement { kind, name, value }) => {
                tracing::debug!(method = kind.as_str(), variable = %name, value, "Measurement");
                self.on_measurement(&name, value, now_ms);
            }
            Ok(Response::Error(message)) => {
                tracing::error!(message = %message, "Controller reported an error");
            }
            Ok(Response::Warning(message)) => {
                tracing::warn!(message = %message, "Controller reported a warning");
            }
            Ok(Response::Unrecognized { method, params }) => {
                tracing::warn!(method = %method, params = %params, "Unrecognized controller message");
            }
            Err(e) => {
                tracing::warn!(line = %line, error = %e, "Discarding controller line");
            }
        }
    }

    /// Queue read requests for every due variable.
    ///
    /// Returns the number of requests queued.
    pub fn poll(&mut self, now_ms: i64) -> usize {
        if !self.controller.is_connected() {
            return 0;
        }

        let due: Vec<String> = self
            .scheduler
            .due(self.parser.registry(), &self.runtime, now_ms)
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut sent = 0;
        for name in due {
            if let Err(e) = self.controller.send(&get_request(&name)) {
                tracing::warn!(variable = %name, error = %e, "Read request not sent");
                break;
            }
            self.scheduler.mark_requested(&mut self.runtime, &name, now_ms);
            sent += 1;
        }

        sent
    }

    /// Log the connection status heartbeat.
    pub fn log_status(&self) {
        let stats = self.messaging.stats();
        tracing::info!(
            controller = %self.controller.state(),
            mqtt = %self.messaging.state(),
            published = stats.success,
            failed = stats.failed,
            skipped = stats.skipped,
            success_rate = stats.success_rate(),
            "Connection status"
        );
    }

    /// Handler for messages on `<base>/<name>/set`.
    ///
    /// Writing values to the controller is not supported; commands are
    /// logged and dropped.
    pub fn on_command(&mut self, variable: &str, payload: &[u8]) {
        tracing::debug!(
            variable = %variable,
            payload = %String::from_utf8_lossy(payload),
            "Command received, writes are not supported"
        );
    }

    fn on_measurement(&mut self, name: &str, value: f64, now_ms: i64) {
        let _ = self
            .messaging
            .publish(&self.topics.state(name), format_value(value));

        let tracks_energy = self
            .parser
            .registry()
            .get(name)
            .is_some_and(|variable| variable.calculate_energy);
        if !tracks_energy {
            return;
        }

        if let Some(total) = self.runtime.entry(name).energy.update(value, now_ms) {
            tracing::debug!(variable = %name, total, "Energy updated");
            let _ = self
                .messaging
                .publish(&self.topics.energy_state(name), format_value(total));
        }
    }

    /// Publish discovery, subscriptions and the running status.
    fn announce(&mut self) {
        let messages = self.discovery.messages(self.parser.registry());
        for message in &messages {
            let _ = self.messaging.publish_json(&message.topic, &message.config);
        }

        let mut subscribed = 0;
        for name in self.parser.registry().names() {
            let topic = self.topics.command(name);
            match self.messaging.subscribe(&topic) {
                Ok(_) => subscribed += 1,
                Err(e) => tracing::warn!(error = %e, "Subscribe failed"),
            }
        }

        let status = BridgeStatus::running(BRIDGE_NAME, env!("CARGO_PKG_VERSION"))
            .with_metadata(self.status_metadata());
        let _ = self.messaging.publish_json(&self.topics.status(), &status);

        tracing::info!(
            discovery = messages.len(),
            subscriptions = subscribed,
            "Announced sensors to Home Assistant"
        );
    }

    fn status_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "variables": self.parser.registry().names().collect::<Vec<_>>(),
            "poll_interval_ms": self.timers.poll.as_millis() as u64,
            "controller": self.controller.state().as_str(),
        })
    }
}

fn timer(mut interval: Interval) -> Interval {
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn interval_after(period: Duration) -> Interval {
    timer(tokio::time::interval_at(Instant::now() + period, period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariableConfig;
    use foxbridge_framework::BridgeError;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingClient {
        published: Arc<Mutex<Vec<(String, String)>>>,
        subscribed: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingClient {
        fn topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }

        fn payloads(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, payload)| payload.clone())
                .collect()
        }

        fn clear(&self) {
            self.published.lock().unwrap().clear();
        }
    }

    impl BrokerClient for RecordingClient {
        fn try_publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _retain: bool,
        ) -> std::result::Result<(), BridgeError> {
            self.published.lock().unwrap().push((
                topic.to_string(),
                String::from_utf8_lossy(&payload).into_owned(),
            ));
            Ok(())
        }

        fn try_subscribe(&self, topic: &str) -> std::result::Result<(), BridgeError> {
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    fn config() -> FoxtrotBridgeConfig {
        let mut config: FoxtrotBridgeConfig = json5::from_str("{}").unwrap();
        config.controller.host = "127.0.0.1".to_string();
        config.controller.port = 1;
        config.mqtt.base_topic = "plc".to_string();
        config.variables = vec![
            VariableConfig::new("P1", "kW").with_energy(),
            VariableConfig::new("T1", "°C"),
        ];
        config
    }

    fn coordinator() -> (
        BridgeCoordinator<RecordingClient>,
        RecordingClient,
        mpsc::Sender<MessagingEvent>,
    ) {
        let client = RecordingClient::default();
        let (tx, rx) = mpsc::channel(8);
        let coordinator = BridgeCoordinator::new(&config(), client.clone(), rx);
        (coordinator, client, tx)
    }

    fn connected() -> (BridgeCoordinator<RecordingClient>, RecordingClient) {
        let (mut coordinator, client, _tx) = coordinator();
        coordinator.handle_messaging_event(MessagingEvent::Connected);
        client.clear();
        (coordinator, client)
    }

    #[tokio::test]
    async fn test_measurement_published_with_three_decimals() {
        let (mut coordinator, client) = connected();

        coordinator.handle_line("GET:T1,21.45678", 1_000);

        assert_eq!(client.topics(), vec!["plc/T1/state"]);
        assert_eq!(client.payloads("plc/T1/state"), vec!["21.457"]);
        assert!(coordinator.runtime().get("T1").is_none());
    }

    #[tokio::test]
    async fn test_energy_published_from_second_sample() {
        let (mut coordinator, client) = connected();

        coordinator.handle_line("GET:P1,2", 0);
        assert!(client.payloads("plc/P1/energy/state").is_empty());

        coordinator.handle_line("DIFF:P1,4", 1_800_000);
        assert_eq!(client.payloads("plc/P1/energy/state"), vec!["1.500"]);
        assert_eq!(client.payloads("plc/P1/state"), vec!["2.000", "4.000"]);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_inert() {
        let (mut coordinator, client) = connected();

        for line in [
            "GARBAGE",
            "GET:",
            "GET:P1",
            "GET:P1,abc",
            "GET:Unknown,1.0",
            "ERROR:something broke",
            "WARNING:careful",
            "PING:1",
        ] {
            coordinator.handle_line(line, 1_000);
        }

        assert!(client.topics().is_empty());
        assert!(coordinator.runtime().is_empty());
    }

    #[tokio::test]
    async fn test_broker_connect_announces() {
        let (mut coordinator, client, _tx) = coordinator();

        coordinator.handle_messaging_event(MessagingEvent::Connected);

        assert_eq!(
            client.topics(),
            vec![
                "homeassistant/sensor/P1/config",
                "homeassistant/sensor/P1_energy/config",
                "homeassistant/sensor/T1/config",
                "plc/bridge/status",
            ]
        );
        assert_eq!(
            *client.subscribed.lock().unwrap(),
            vec!["plc/P1/set", "plc/T1/set"]
        );

        let status: serde_json::Value =
            serde_json::from_str(&client.payloads("plc/bridge/status")[0]).unwrap();
        assert_eq!(status["status"], "running");
        assert_eq!(status["variables"], serde_json::json!(["P1", "T1"]));
    }

    #[tokio::test]
    async fn test_rediscovery_is_identical() {
        let (mut coordinator, client, _tx) = coordinator();

        coordinator.handle_messaging_event(MessagingEvent::Connected);
        let first = client.published.lock().unwrap().clone();
        client.clear();

        coordinator.handle_messaging_event(MessagingEvent::Disconnected("reset".to_string()));
        coordinator.handle_messaging_event(MessagingEvent::Connected);
        let second = client.published.lock().unwrap().clone();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_disconnected_broker_suppresses_publish() {
        let (mut coordinator, client, _tx) = coordinator();

        coordinator.handle_line("GET:P1,2", 0);
        coordinator.handle_line("GET:P1,2", 3_600_000);

        assert!(client.topics().is_empty());
        // Two state publishes and one energy publish.
        assert_eq!(coordinator.messaging().stats().skipped, 3);
        // Integration continues while the broker is away.
        assert_eq!(coordinator.runtime().get("P1").unwrap().energy.total(), 2.0);
    }

    #[tokio::test]
    async fn test_commands_are_accepted_and_dropped() {
        let (mut coordinator, client) = connected();

        coordinator.handle_messaging_event(MessagingEvent::Command {
            topic: "plc/P1/set".to_string(),
            payload: b"5".to_vec(),
        });
        coordinator.handle_messaging_event(MessagingEvent::Command {
            topic: "plc/Unknown/set".to_string(),
            payload: b"5".to_vec(),
        });

        assert!(client.topics().is_empty());
        assert!(coordinator.runtime().is_empty());
    }

    #[tokio::test]
    async fn test_poll_requires_connected_controller() {
        let (mut coordinator, _client) = connected();
        assert_eq!(coordinator.poll(0), 0);
        assert!(coordinator.runtime().is_empty());
    }

    #[tokio::test]
    async fn test_state_payload_rounds_ties_away_from_zero() {
        let (mut coordinator, client) = connected();

        coordinator.handle_line("GET:T1,21.0625", 1_000);
        coordinator.handle_line("GET:T1,-0.0625", 1_000);
        coordinator.handle_line("GET:T1,-0", 1_000);
        coordinator.handle_line("GET:T1,-0.0001", 1_000);

        assert_eq!(
            client.payloads("plc/T1/state"),
            vec!["21.063", "-0.063", "0.000", "-0.000"]
        );
    }

    /// Feed controller events to the coordinator until the link reaches the
    /// wanted connection state.
    async fn settle(
        coordinator: &mut BridgeCoordinator<RecordingClient>,
        connected: bool,
        now_ms: i64,
    ) {
        while coordinator.controller().is_connected() != connected {
            let event = tokio::time::timeout(
                Duration::from_secs(2),
                coordinator.controller_events.recv(),
            )
            .await
            .unwrap()
            .unwrap();
            coordinator.handle_controller_event(event, now_ms);
        }
    }

    async fn accept_controller(
        coordinator: &mut BridgeCoordinator<RecordingClient>,
        listener: &tokio::net::TcpListener,
        now_ms: i64,
    ) -> tokio::net::TcpStream {
        coordinator.watchdog();
        let (server, _) = listener.accept().await.unwrap();
        settle(coordinator, true, now_ms).await;
        server
    }

    #[tokio::test]
    async fn test_reconnect_makes_every_variable_due() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.controller.port = listener.local_addr().unwrap().port();
        config.controller.poll_interval_ms = 3_600_000;

        let client = RecordingClient::default();
        let (_tx, rx) = mpsc::channel(8);
        let mut coordinator = BridgeCoordinator::new(&config, client, rx);

        let server = accept_controller(&mut coordinator, &listener, 0).await;
        assert_eq!(coordinator.poll(1_000), 2);
        // Nothing is due again within the hour.
        assert_eq!(coordinator.poll(2_000), 0);

        coordinator.handle_line("GET:P1,2", 2_000);
        coordinator.handle_line("GET:P1,4", 1_802_000);
        let total = coordinator.runtime().get("P1").unwrap().energy.total();
        assert_eq!(total, 1.5);

        drop(server);
        settle(&mut coordinator, false, 1_803_000).await;

        let _server = accept_controller(&mut coordinator, &listener, 1_804_000).await;
        assert_eq!(coordinator.poll(1_805_000), 2);
        assert_eq!(coordinator.runtime().last_request_ms("T1"), Some(1_805_000));
        assert_eq!(coordinator.runtime().get("P1").unwrap().energy.total(), total);
    }

    #[test]
    fn test_clock_is_monotonic_offset() {
        let clock = Clock {
            origin: Instant::now(),
            origin_ms: 1_000,
        };
        assert_eq!(clock.at(clock.origin + Duration::from_millis(250)), 1_250);
        assert_eq!(clock.at(clock.origin), 1_000);
    }
}
