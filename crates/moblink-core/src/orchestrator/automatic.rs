//! Automatic mode.

use crate::config::Credentials;
use crate::error::{RelayError, Result};
use crate::relay::{Endpoint, Relay, RelayContext};
use crate::status::{AutomaticStatus, RelayStatus};
use moblink_discovery::ScannerEvent;
use moblink_transport::Network;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

enum Command {
    Start(Credentials),
    Stop,
    Found {
        name: String,
        url: String,
        network: Option<Network>,
    },
    Lost {
        name: String,
    },
    SetUplink(Option<Network>),
    RelayStatus {
        name: String,
        session: u64,
        status: RelayStatus,
    },
    Relays(oneshot::Sender<Vec<(String, RelayStatus)>>),
}

/// Handle to the automatic mode task.
///
/// Discovered streamers are fed in with [`Orchestrator::found`] (or from a
/// scanner with [`Orchestrator::follow_scanner`]). Each new identity gets its
/// own relay, configured with the shared credentials and bound to the uplink.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<AutomaticStatus>,
}

impl Orchestrator {
    /// Spawn a stopped orchestrator.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(context: RelayContext) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(AutomaticStatus::NotStarted);

        let task = OrchestratorTask {
            context,
            commands: commands.downgrade(),
            status_tx,
            credentials: None,
            uplink: None,
            session: 0,
            relays: HashMap::new(),
        };
        tokio::spawn(task.run(commands_rx));

        Self { commands, status }
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Orchestrator task has exited");
        }
    }

    /// Start automatic mode with credentials shared by every relay.
    pub fn start(&self, credentials: Credentials) {
        self.post(Command::Start(credentials));
    }

    /// Stop automatic mode and tear down every relay.
    pub fn stop(&self) {
        self.post(Command::Stop);
    }

    /// A streamer was discovered at `url`.
    pub fn found(&self, name: impl Into<String>, url: impl Into<String>, network: Option<Network>) {
        self.post(Command::Found {
            name: name.into(),
            url: url.into(),
            network,
        });
    }

    /// A streamer stopped advertising.
    pub fn lost(&self, name: impl Into<String>) {
        self.post(Command::Lost { name: name.into() });
    }

    /// Uplink became available (`Some`) or was lost (`None`).
    pub fn set_uplink(&self, network: Option<Network>) {
        self.post(Command::SetUplink(network));
    }

    /// Current aggregate status.
    #[must_use]
    pub fn status(&self) -> AutomaticStatus {
        *self.status.borrow()
    }

    /// Watch aggregate status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<AutomaticStatus> {
        self.status.clone()
    }

    /// Managed relays and their last reported status, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Closed` if the orchestrator task has exited.
    pub async fn relays(&self) -> Result<Vec<(String, RelayStatus)>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Relays(tx))
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    /// Forward scanner events until the scanner stops.
    pub fn follow_scanner(
        &self,
        mut events: mpsc::UnboundedReceiver<ScannerEvent>,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ScannerEvent::Found { name, url, network } => {
                        orchestrator.found(name, url, network);
                    }
                    ScannerEvent::Lost { name } => orchestrator.lost(name),
                }
            }
        })
    }
}

struct ManagedRelay {
    relay: Relay,
    status: RelayStatus,
    watcher: JoinHandle<()>,
}

impl Drop for ManagedRelay {
    fn drop(&mut self) {
        self.relay.stop();
        self.watcher.abort();
    }
}

struct OrchestratorTask {
    context: RelayContext,
    commands: mpsc::WeakUnboundedSender<Command>,
    status_tx: watch::Sender<AutomaticStatus>,
    /// `Some` while started
    credentials: Option<Credentials>,
    uplink: Option<Network>,
    /// Bumped on every start and stop; relay status from older sessions is
    /// ignored
    session: u64,
    relays: HashMap<String, ManagedRelay>,
}

impl OrchestratorTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
            self.publish_status();
        }
        self.relays.clear();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start(credentials) => {
                if self.credentials.is_some() {
                    return;
                }
                tracing::info!("Automatic mode start");
                self.session += 1;
                self.credentials = Some(credentials);
            }
            Command::Stop => {
                if self.credentials.take().is_none() {
                    return;
                }
                tracing::info!("Automatic mode stop");
                self.session += 1;
                self.relays.clear();
            }
            Command::Found { name, url, network } => self.handle_found(name, url, network),
            Command::Lost { name } => {
                tracing::info!("Streamer lost: {}", name);
            }
            Command::SetUplink(network) => {
                self.uplink = network;
                for managed in self.relays.values() {
                    managed.relay.set_data_plane_network(self.uplink.clone());
                }
            }
            Command::RelayStatus {
                name,
                session,
                status,
            } => {
                if session != self.session || self.credentials.is_none() {
                    return;
                }
                if let Some(managed) = self.relays.get_mut(&name) {
                    managed.status = status;
                }
            }
            Command::Relays(reply) => {
                let mut relays: Vec<(String, RelayStatus)> = self
                    .relays
                    .iter()
                    .map(|(name, managed)| (name.clone(), managed.status))
                    .collect();
                relays.sort_by(|a, b| a.0.cmp(&b.0));
                let _ = reply.send(relays);
            }
        }
    }

    fn handle_found(&mut self, name: String, url: String, network: Option<Network>) {
        let Some(credentials) = &self.credentials else {
            tracing::debug!("Ignoring streamer {} while stopped", name);
            return;
        };

        if let Some(managed) = self.relays.get(&name) {
            managed.relay.add_endpoint(url, network);
            return;
        }

        tracing::info!("Streamer found: {} at {}", name, url);
        let relay = Relay::spawn(self.context.clone());
        relay.configure(credentials.clone(), vec![Endpoint::new(url, network)]);
        relay.start();
        relay.set_data_plane_network(self.uplink.clone());

        let watcher = self.watch_relay(name.clone(), &relay);
        self.relays.insert(
            name,
            ManagedRelay {
                status: relay.status(),
                relay,
                watcher,
            },
        );
    }

    fn watch_relay(&self, name: String, relay: &Relay) -> JoinHandle<()> {
        let mut status = relay.subscribe_status();
        let commands = self.commands.clone();
        let session = self.session;
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                let Some(tx) = commands.upgrade() else {
                    return;
                };
                let _ = tx.send(Command::RelayStatus {
                    name: name.clone(),
                    session,
                    status: current,
                });
            }
        })
    }

    fn publish_status(&self) {
        let status = AutomaticStatus::evaluate(
            self.credentials.is_some(),
            self.uplink.is_some(),
            self.relays.values().map(|managed| managed.status),
        );
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            tracing::info!("Automatic status: {}", status);
            *current = status;
            true
        });
    }
}
