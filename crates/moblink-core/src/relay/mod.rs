//! Relay session with one streamer.
//!
//! A [`Relay`] is a handle to an actor task that owns all session state. The
//! handle posts commands; the task processes them one at a time together with
//! events from the control channel, the tunnel and the reconnect timer.
//!
//! ```text
//!              start()
//!   Idle ──────────────────► Connecting ──► AwaitingChallenge ──► Identifying
//!    ▲                           ▲                                  │     │
//!    │ stop() from any state     │ after reconnect delay            │ ok  │ wrongPassword
//!    │                           │                                  ▼     ▼
//!    │                      Disconnected ◄──── failure ──────── Connected  WrongPassword
//! ```
//!
//! Any failure (channel closed, socket error, malformed message) tears the
//! session down, moves to the next endpoint and reconnects after
//! [`RelayTimings::reconnect_delay`].
//!
//! The task exits once every handle is dropped.

mod actor;
mod endpoint;

pub use endpoint::{Endpoint, EndpointList};

use crate::config::{Credentials, RelayTimings};
use crate::error::{RelayError, Result};
use crate::status::{RelayStatus, StatusSource};
use actor::{Command, RelayActor};
use moblink_transport::{Network, SocketFactory};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Observable protocol state of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    /// Not started
    Idle,
    /// Opening the control channel
    Connecting,
    /// Channel open, waiting for hello
    AwaitingChallenge,
    /// Identify sent, waiting for the verdict
    Identifying,
    /// Identified; serving requests
    Connected,
    /// Password rejected
    WrongPassword,
    /// Waiting to reconnect
    Disconnected,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingChallenge => "awaiting challenge",
            Self::Identifying => "identifying",
            Self::Connected => "connected",
            Self::WrongPassword => "wrong password",
            Self::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}

/// Collaborators shared by every relay.
#[derive(Clone)]
pub struct RelayContext {
    /// Creates interface-bound sockets
    pub socket_factory: Arc<dyn SocketFactory>,
    /// Answers status requests
    pub status_source: Arc<dyn StatusSource>,
    /// Timing parameters
    pub timings: RelayTimings,
}

impl RelayContext {
    /// Create a context with default timings.
    pub fn new(
        socket_factory: Arc<dyn SocketFactory>,
        status_source: Arc<dyn StatusSource>,
    ) -> Self {
        Self {
            socket_factory,
            status_source,
            timings: RelayTimings::default(),
        }
    }

    /// Replace the timings (builder pattern)
    #[must_use]
    pub fn with_timings(mut self, timings: RelayTimings) -> Self {
        self.timings = timings;
        self
    }
}

impl fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayContext")
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

/// Handle to a relay task.
///
/// # Examples
///
/// ```no_run
/// use moblink_core::relay::{Endpoint, Relay, RelayContext};
/// use moblink_core::status::FixedStatus;
/// use moblink_core::Credentials;
/// use moblink_transport::{Network, SystemSocketFactory};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let context = RelayContext::new(
///     Arc::new(SystemSocketFactory::default()),
///     Arc::new(FixedStatus::default()),
/// );
/// let relay = Relay::spawn(context);
/// relay.configure(
///     Credentials::new("2f1c...", "Phone", "secret"),
///     vec![Endpoint::new("ws://192.168.1.5:7777", None)],
/// );
/// relay.set_data_plane_network(Some(Network::new("wwan0", "10.64.12.7".parse()?)));
/// relay.start();
///
/// let mut status = relay.subscribe_status();
/// while status.changed().await.is_ok() {
///     println!("{}", *status.borrow());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Relay {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<RelayState>,
    status: watch::Receiver<RelayStatus>,
}

impl Relay {
    /// Spawn an idle, unconfigured relay task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(context: RelayContext) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(RelayState::Idle);
        let (status_tx, status) = watch::channel(RelayStatus::UrlEmpty);

        let actor = RelayActor::new(context, commands.downgrade(), state_tx, status_tx);
        tokio::spawn(actor.run(commands_rx));

        Self {
            commands,
            state,
            status,
        }
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Relay task has exited");
        }
    }

    /// Replace identity, credentials and endpoints.
    ///
    /// The endpoint index is reset to 0. Takes effect on the next connection
    /// attempt.
    pub fn configure(&self, credentials: Credentials, endpoints: Vec<Endpoint>) {
        self.post(Command::Configure {
            credentials,
            endpoints,
        });
    }

    /// Start connecting. Does nothing if already started.
    pub fn start(&self) {
        self.post(Command::Start);
    }

    /// Stop and tear everything down. Does nothing if already stopped.
    pub fn stop(&self) {
        self.post(Command::Stop);
    }

    /// Add an endpoint unless its URL is already known.
    ///
    /// A live session is not interrupted.
    pub fn add_endpoint(&self, url: impl Into<String>, network: Option<Network>) {
        self.post(Command::AddEndpoint(Endpoint::new(url, network)));
    }

    /// Bind tunnels to `network`, or mark the uplink unavailable.
    ///
    /// Forces a reconnect if a tunnel is active.
    pub fn set_data_plane_network(&self, network: Option<Network>) {
        self.post(Command::SetDataPlaneNetwork(network));
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RelayStatus {
        *self.status.borrow()
    }

    /// Watch protocol state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<RelayStatus> {
        self.status.clone()
    }

    /// Index of the endpoint used for the current or next attempt.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Closed` if the relay task has exited.
    pub async fn current_endpoint_index(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::EndpointIndex(tx))
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    /// Wait until every previously posted command has been processed.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Closed` if the relay task has exited.
    pub async fn sync(&self) -> Result<()> {
        self.current_endpoint_index().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FixedStatus;
    use moblink_transport::SystemSocketFactory;
    use std::time::Duration;
    use tokio::time::timeout;

    fn relay(reconnect_delay: Duration) -> Relay {
        let timings = RelayTimings {
            reconnect_delay,
            ..RelayTimings::default()
        };
        Relay::spawn(
            RelayContext::new(
                Arc::new(SystemSocketFactory::default()),
                Arc::new(FixedStatus::default()),
            )
            .with_timings(timings),
        )
    }

    /// A loopback URL nothing listens on.
    fn refused_url() -> String {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        format!("ws://127.0.0.1:{port}")
    }

    async fn wait_state(relay: &Relay, expected: RelayState) {
        let mut state = relay.subscribe_state();
        timeout(Duration::from_secs(2), state.wait_for(|s| *s == expected))
            .await
            .expect("Timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn test_configure_publishes_status() {
        let relay = relay(Duration::from_secs(5));
        relay.configure(
            Credentials::new("id", "Relay", ""),
            vec![Endpoint::new("ws://127.0.0.1:1", None)],
        );
        relay.sync().await.unwrap();
        assert_eq!(relay.status(), RelayStatus::PasswordEmpty);

        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![Endpoint::new("ws://127.0.0.1:1", None)],
        );
        relay.sync().await.unwrap();
        assert_eq!(relay.status(), RelayStatus::WaitingForUplink);

        relay.set_data_plane_network(Some(Network::any_v4()));
        relay.sync().await.unwrap();
        assert_eq!(relay.status(), RelayStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_with_empty_url_does_not_connect() {
        let relay = relay(Duration::from_secs(5));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![Endpoint::new("", None)],
        );
        relay.start();
        relay.sync().await.unwrap();
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(relay.status(), RelayStatus::UrlEmpty);
    }

    #[tokio::test]
    async fn test_failure_advances_endpoint() {
        let relay = relay(Duration::from_secs(30));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![
                Endpoint::new(refused_url(), None),
                Endpoint::new(refused_url(), None),
                Endpoint::new(refused_url(), None),
            ],
        );
        relay.start();
        wait_state(&relay, RelayState::Disconnected).await;
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 1);
        assert_eq!(relay.status(), RelayStatus::WaitingForUplink);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_over_to_next_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let relay = relay(Duration::from_millis(50));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![
                Endpoint::new("http://10.0.0.1:7777", None),
                Endpoint::new(url, None),
            ],
        );
        relay.start();
        relay.sync().await.unwrap();
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 1);

        let accepted = timeout(Duration::from_secs(2), listener.accept()).await;
        assert!(matches!(accepted, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn test_invalid_only_endpoint_stays_put() {
        let relay = relay(Duration::from_millis(50));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![Endpoint::new("http://10.0.0.1:7777", None)],
        );
        relay.start();
        relay.sync().await.unwrap();
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_configure_resets_index() {
        let relay = relay(Duration::from_secs(30));
        let endpoints = vec![
            Endpoint::new(refused_url(), None),
            Endpoint::new(refused_url(), None),
        ];
        relay.configure(Credentials::new("id", "Relay", "pw"), endpoints.clone());
        relay.start();
        wait_state(&relay, RelayState::Disconnected).await;
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 1);

        relay.configure(Credentials::new("id", "Relay", "pw"), endpoints);
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_reconnect() {
        let relay = relay(Duration::from_millis(100));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![Endpoint::new(refused_url(), None)],
        );
        relay.start();
        wait_state(&relay, RelayState::Disconnected).await;

        relay.stop();
        relay.sync().await.unwrap();
        assert_eq!(relay.state(), RelayState::Idle);

        let mut state = relay.subscribe_state();
        state.borrow_and_update();
        assert!(
            timeout(Duration::from_millis(400), state.changed())
                .await
                .is_err()
        );
        assert_eq!(relay.state(), RelayState::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let relay = relay(Duration::from_secs(30));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![Endpoint::new(refused_url(), None)],
        );
        relay.stop();
        relay.start();
        relay.start();
        wait_state(&relay, RelayState::Disconnected).await;
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 0);

        relay.stop();
        relay.stop();
        relay.sync().await.unwrap();
        assert_eq!(relay.state(), RelayState::Idle);
    }

    #[tokio::test]
    async fn test_add_endpoint_deduplicates() {
        let relay = relay(Duration::from_secs(30));
        relay.configure(
            Credentials::new("id", "Relay", "pw"),
            vec![Endpoint::new(refused_url(), None)],
        );
        let url = refused_url();
        relay.add_endpoint(url.clone(), None);
        relay.add_endpoint(url, Some(Network::any_v4()));
        relay.start();
        wait_state(&relay, RelayState::Disconnected).await;
        // Two distinct endpoints: one failure moves to the second.
        assert_eq!(relay.current_endpoint_index().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_relay_task_exits_when_dropped() {
        let relay = relay(Duration::from_secs(30));
        let mut state = relay.subscribe_state();
        drop(relay);
        // Sender side lives in the task; it goes away when the task exits.
        timeout(Duration::from_secs(2), async {
            while state.changed().await.is_ok() {}
        })
        .await
        .expect("Timeout");
    }
}
