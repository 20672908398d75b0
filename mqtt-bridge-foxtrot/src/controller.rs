//! TCP link to the Foxtrot controller.
//!
//! Connection attempts, socket reads and socket writes run in spawned tasks
//! and report back on the link's event channel. Every event carries the
//! generation of the connection it belongs to, so events from a torn-down
//! connection are recognised and ignored.
//!
//! Commands are queued to the writer task without waiting. A controller that
//! stops reading fills the queue, and the link is torn down instead of
//! stalling the caller.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{decode_lines, encode_command};
use crate::runtime::LinkState;

const READ_BUFFER_SIZE: usize = 4096;

/// Commands queued for the writer task before the link gives up.
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// Controller link failures. None of them is fatal.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("controller not connected")]
    NotConnected,
    #[error("failed to connect to {address}: {source}")]
    Connect { address: String, source: io::Error },
    #[error("connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("write to controller failed: {0}")]
    Write(#[source] io::Error),
    #[error("controller is not accepting data, {0} commands pending")]
    Backlog(usize),
    #[error("controller writer stopped")]
    WriterStopped,
    #[error("read from controller failed: {0}")]
    Read(#[source] io::Error),
}

/// Event produced by the link's background tasks.
#[derive(Debug)]
pub enum ControllerEvent {
    Connected { generation: u64, stream: TcpStream },
    ConnectFailed { generation: u64, error: LinkError },
    Data { generation: u64, bytes: Vec<u8> },
    Closed { generation: u64 },
    Failed { generation: u64, error: LinkError },
}

impl ControllerEvent {
    pub fn generation(&self) -> u64 {
        match self {
            ControllerEvent::Connected { generation, .. }
            | ControllerEvent::ConnectFailed { generation, .. }
            | ControllerEvent::Data { generation, .. }
            | ControllerEvent::Closed { generation }
            | ControllerEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// What the coordinator has to act on after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerSignal {
    /// The link just became connected.
    Connected,
    /// Decoded lines received from the controller.
    Lines(Vec<String>),
    /// The link dropped or a connection attempt failed.
    Disconnected,
    /// Stale or irrelevant event.
    Ignored,
}

/// Connection state machine of the controller link.
pub struct ControllerLink {
    address: String,
    connect_timeout: Duration,
    state: LinkState,
    generation: u64,
    commands: Option<mpsc::Sender<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    events: mpsc::Sender<ControllerEvent>,
}

impl ControllerLink {
    pub fn new(
        address: impl Into<String>,
        connect_timeout: Duration,
        events: mpsc::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            state: LinkState::Disconnected,
            generation: 0,
            commands: None,
            reader: None,
            writer: None,
            events,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Start a connection attempt if the link is disconnected.
    ///
    /// Returns `false` when an attempt is already running or the link is up.
    pub fn connect(&mut self) -> bool {
        if self.state != LinkState::Disconnected {
            return false;
        }

        self.generation += 1;
        self.state = LinkState::Connecting;

        let generation = self.generation;
        let address = self.address.clone();
        let timeout = self.connect_timeout;
        let events = self.events.clone();

        tracing::info!(address = %address, "Connecting to controller");

        tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => ControllerEvent::Connected { generation, stream },
                Ok(Err(source)) => ControllerEvent::ConnectFailed {
                    generation,
                    error: LinkError::Connect { address, source },
                },
                Err(_) => ControllerEvent::ConnectFailed {
                    generation,
                    error: LinkError::ConnectTimeout { address, timeout },
                },
            };
            let _ = events.send(event).await;
        });

        true
    }

    /// Apply an event from the background tasks.
    pub fn on_event(&mut self, event: ControllerEvent) -> ControllerSignal {
        if event.generation() != self.generation {
            tracing::trace!(generation = event.generation(), "Ignoring stale controller event");
            return ControllerSignal::Ignored;
        }

        match event {
            ControllerEvent::Connected { stream, .. } => {
                if self.state != LinkState::Connecting {
                    return ControllerSignal::Ignored;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                let (read_half, write_half) = stream.into_split();
                let (commands, queue) = mpsc::channel(WRITE_QUEUE_CAPACITY);
                self.commands = Some(commands);
                self.reader = Some(spawn_reader(
                    read_half,
                    self.generation,
                    self.events.clone(),
                ));
                self.writer = Some(spawn_writer(
                    write_half,
                    queue,
                    self.generation,
                    self.events.clone(),
                ));
                self.state = LinkState::Connected;
                tracing::info!(address = %self.address, "Connected to controller");
                ControllerSignal::Connected
            }
            ControllerEvent::ConnectFailed { error, .. } => {
                tracing::error!(error = %error, "Controller connection failed");
                self.state = LinkState::Disconnected;
                ControllerSignal::Disconnected
            }
            ControllerEvent::Data { bytes, .. } => {
                let lines = decode_lines(&bytes);
                tracing::trace!(bytes = bytes.len(), lines = lines.len(), "Controller data");
                ControllerSignal::Lines(lines)
            }
            ControllerEvent::Closed { .. } => {
                tracing::warn!(address = %self.address, "Controller closed the connection");
                self.teardown();
                ControllerSignal::Disconnected
            }
            ControllerEvent::Failed { error, .. } => {
                tracing::error!(error = %error, "Controller connection error");
                self.teardown();
                ControllerSignal::Disconnected
            }
        }
    }

    /// Queue one command line for the controller without waiting.
    ///
    /// A full queue means the controller stopped reading: the connection is
    /// torn down and the watchdog reconnects. Socket write failures arrive
    /// later as [`ControllerEvent::Failed`].
    pub fn send(&mut self, command: &str) -> Result<(), LinkError> {
        let commands = match (&self.state, self.commands.as_ref()) {
            (LinkState::Connected, Some(commands)) => commands,
            _ => return Err(LinkError::NotConnected),
        };

        let error = match commands.try_send(encode_command(command)) {
            Ok(()) => {
                tracing::debug!(command = %command, "Queued for controller");
                return Ok(());
            }
            Err(mpsc::error::TrySendError::Full(_)) => LinkError::Backlog(WRITE_QUEUE_CAPACITY),
            Err(mpsc::error::TrySendError::Closed(_)) => LinkError::WriterStopped,
        };

        tracing::error!(error = %error, command = %command, "Controller send failed");
        self.teardown();
        Err(error)
    }

    /// Close the transport and move to `Disconnected`.
    pub fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // The writer owns the write half; dropping it shuts the socket down.
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.commands = None;
        // Anything still queued from the old connection is now stale.
        self.generation += 1;
        self.state = LinkState::Disconnected;
    }
}

impl Drop for ControllerLink {
    fn drop(&mut self) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

fn spawn_writer(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Vec<u8>>,
    generation: u64,
    events: mpsc::Sender<ControllerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = queue.recv().await {
            if let Err(e) = writer.write_all(&line).await {
                let _ = events
                    .send(ControllerEvent::Failed {
                        generation,
                        error: LinkError::Write(e),
                    })
                    .await;
                break;
            }
        }
    })
}

fn spawn_reader(
    mut reader: OwnedReadHalf,
    generation: u64,
    events: mpsc::Sender<ControllerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let event = match reader.read(&mut buf).await {
                Ok(0) => ControllerEvent::Closed { generation },
                Ok(n) => ControllerEvent::Data {
                    generation,
                    bytes: buf[..n].to_vec(),
                },
                Err(e) => ControllerEvent::Failed {
                    generation,
                    error: LinkError::Read(e),
                },
            };
            let last = !matches!(event, ControllerEvent::Data { .. });
            if events.send(event).await.is_err() || last {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn next_signal(
        link: &mut ControllerLink,
        rx: &mut mpsc::Receiver<ControllerEvent>,
    ) -> ControllerSignal {
        let event = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .unwrap()
            .unwrap();
        link.on_event(event)
    }

    async fn connected_pair() -> (
        ControllerLink,
        mpsc::Receiver<ControllerEvent>,
        TcpStream,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::channel(16);
        let mut link = ControllerLink::new(address, TIMEOUT, tx);

        assert!(link.connect());
        assert_eq!(link.state(), LinkState::Connecting);
        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(next_signal(&mut link, &mut rx).await, ControllerSignal::Connected);

        (link, rx, server)
    }

    #[tokio::test]
    async fn test_connect_and_receive_lines() {
        let (mut link, mut rx, mut server) = connected_pair().await;
        assert!(link.is_connected());

        server
            .write_all(b"GET:P1,1.5\r\nDIFF:P2,2\r\n")
            .await
            .unwrap();

        assert_eq!(
            next_signal(&mut link, &mut rx).await,
            ControllerSignal::Lines(vec!["GET:P1,1.5".to_string(), "DIFF:P2,2".to_string()])
        );
    }

    #[tokio::test]
    async fn test_send_writes_crlf_line() {
        let (mut link, _rx, server) = connected_pair().await;

        tokio_test::assert_ok!(link.send("GET:P1"));

        let mut lines = tokio::io::BufReader::new(server).lines();
        let line = tokio::time::timeout(TIMEOUT, lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.as_deref(), Some("GET:P1"));
    }

    #[tokio::test]
    async fn test_stalled_controller_tears_link_down() {
        // The server end stays open but is never read.
        let (mut link, mut rx, _server) = connected_pair().await;
        let command = format!("GET:{}", "P".repeat(64 * 1024));

        let error = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match link.send(&command) {
                    Ok(()) => tokio::task::yield_now().await,
                    Err(e) => return e,
                }
            }
        })
        .await
        .expect("send never gave up on a stalled controller");

        assert!(matches!(error, LinkError::Backlog(WRITE_QUEUE_CAPACITY)));
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(matches!(link.send("GET:P1"), Err(LinkError::NotConnected)));

        // Leftovers from the dropped connection no longer count.
        while let Ok(event) = rx.try_recv() {
            assert_eq!(link.on_event(event), ControllerSignal::Ignored);
        }
        assert!(link.connect());
    }

    #[tokio::test]
    async fn test_connect_is_noop_unless_disconnected() {
        let (mut link, _rx, _server) = connected_pair().await;
        assert!(!link.connect());
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn test_remote_close_disconnects() {
        let (mut link, mut rx, server) = connected_pair().await;
        drop(server);

        assert_eq!(next_signal(&mut link, &mut rx).await, ControllerSignal::Disconnected);
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(matches!(link.send("GET:P1"), Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(16);
        let mut link = ControllerLink::new(address, TIMEOUT, tx);

        assert!(link.connect());
        assert_eq!(next_signal(&mut link, &mut rx).await, ControllerSignal::Disconnected);
        assert_eq!(link.state(), LinkState::Disconnected);

        // The watchdog may try again.
        assert!(link.connect());
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let (tx, _rx) = mpsc::channel(16);
        let mut link = ControllerLink::new("127.0.0.1:1", TIMEOUT, tx);
        assert!(matches!(link.send("GET:P1"), Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_events_after_teardown_are_ignored() {
        let (mut link, _rx, _server) = connected_pair().await;
        let stale = link.generation;

        link.teardown();
        assert_eq!(link.state(), LinkState::Disconnected);

        let signal = link.on_event(ControllerEvent::Data {
            generation: stale,
            bytes: b"GET:P1,1\r\n".to_vec(),
        });
        assert_eq!(signal, ControllerSignal::Ignored);

        let signal = link.on_event(ControllerEvent::Closed { generation: stale });
        assert_eq!(signal, ControllerSignal::Ignored);
    }
}
