//! Manual mode.

use crate::config::Credentials;
use crate::relay::{Endpoint, Relay, RelayContext};
use crate::status::RelayStatus;
use moblink_transport::Network;
use std::fmt;
use tokio::sync::watch;
use zeroize::Zeroize;

/// One operator-configured streamer.
#[derive(Clone, Default, PartialEq, Eq, Zeroize)]
pub struct ManualSettings {
    /// Streamer URL
    pub url: String,
    /// Streamer password
    pub password: String,
}

impl ManualSettings {
    /// Create settings for one streamer.
    pub fn new(url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ManualSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSettings")
            .field("url", &self.url)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One relay per configured streamer, started and stopped individually.
#[derive(Debug)]
pub struct ManualRelays {
    context: RelayContext,
    relay_id: String,
    name: String,
    uplink: Option<Network>,
    relays: Vec<Relay>,
}

impl ManualRelays {
    /// Spawn one stopped relay per entry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        context: RelayContext,
        relay_id: impl Into<String>,
        name: impl Into<String>,
        entries: &[ManualSettings],
    ) -> Self {
        let mut manual = Self {
            context,
            relay_id: relay_id.into(),
            name: name.into(),
            uplink: None,
            relays: Vec::new(),
        };
        manual.apply(entries);
        manual
    }

    fn credentials(&self, entry: &ManualSettings) -> Credentials {
        Credentials::new(self.relay_id.clone(), self.name.clone(), entry.password.clone())
    }

    fn apply(&mut self, entries: &[ManualSettings]) {
        for (index, entry) in entries.iter().enumerate() {
            let credentials = self.credentials(entry);
            let endpoints = vec![Endpoint::new(entry.url.clone(), None)];
            match self.relays.get(index) {
                Some(relay) => relay.configure(credentials, endpoints),
                None => {
                    let relay = Relay::spawn(self.context.clone());
                    relay.configure(credentials, endpoints);
                    relay.set_data_plane_network(self.uplink.clone());
                    self.relays.push(relay);
                }
            }
        }
        for removed in self.relays.drain(entries.len().min(self.relays.len())..) {
            removed.stop();
        }
    }

    /// Reconfigure from new settings without recreating running relays.
    ///
    /// Entry `i` reconfigures relay `i`. Extra entries get new stopped
    /// relays, relays without an entry are stopped and dropped.
    pub fn update_settings(
        &mut self,
        relay_id: impl Into<String>,
        name: impl Into<String>,
        entries: &[ManualSettings],
    ) {
        self.relay_id = relay_id.into();
        self.name = name.into();
        self.apply(entries);
    }

    /// Uplink became available (`Some`) or was lost (`None`).
    pub fn set_uplink(&mut self, network: Option<Network>) {
        for relay in &self.relays {
            relay.set_data_plane_network(network.clone());
        }
        self.uplink = network;
    }

    /// Start relay `index`. Returns false if there is no such relay.
    pub fn start(&self, index: usize) -> bool {
        self.relays.get(index).map(Relay::start).is_some()
    }

    /// Stop relay `index`. Returns false if there is no such relay.
    pub fn stop(&self, index: usize) -> bool {
        self.relays.get(index).map(Relay::stop).is_some()
    }

    /// Start every relay.
    pub fn start_all(&self) {
        self.relays.iter().for_each(Relay::start);
    }

    /// Stop every relay.
    pub fn stop_all(&self) {
        self.relays.iter().for_each(Relay::stop);
    }

    /// Relay `index`.
    #[must_use]
    pub fn relay(&self, index: usize) -> Option<&Relay> {
        self.relays.get(index)
    }

    /// Number of relays.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relays.len()
    }

    /// Check if no streamers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Status of every relay, in configuration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<RelayStatus> {
        self.relays.iter().map(Relay::status).collect()
    }

    /// Status watchers of every relay, in configuration order.
    #[must_use]
    pub fn subscribe_statuses(&self) -> Vec<watch::Receiver<RelayStatus>> {
        self.relays.iter().map(Relay::subscribe_status).collect()
    }
}

impl Drop for ManualRelays {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FixedStatus;
    use moblink_transport::SystemSocketFactory;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn context() -> RelayContext {
        RelayContext::new(
            Arc::new(SystemSocketFactory::default()),
            Arc::new(FixedStatus::default()),
        )
    }

    async fn wait_status(relay: &Relay, expected: RelayStatus) {
        let mut status = relay.subscribe_status();
        timeout(Duration::from_secs(2), status.wait_for(|s| *s == expected))
            .await
            .expect("Timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_per_relay() {
        let manual = ManualRelays::new(
            context(),
            "id",
            "Relay",
            &[
                ManualSettings::new("", "pw"),
                ManualSettings::new("ws://127.0.0.1:1", ""),
                ManualSettings::new("ws://127.0.0.1:1", "pw"),
            ],
        );
        assert_eq!(manual.len(), 3);

        wait_status(manual.relay(0).unwrap(), RelayStatus::UrlEmpty).await;
        wait_status(manual.relay(1).unwrap(), RelayStatus::PasswordEmpty).await;
        wait_status(manual.relay(2).unwrap(), RelayStatus::WaitingForUplink).await;
    }

    #[tokio::test]
    async fn test_uplink_and_start_stop() {
        let mut manual = ManualRelays::new(
            context(),
            "id",
            "Relay",
            &[ManualSettings::new("ws://127.0.0.1:1", "pw")],
        );
        let relay = manual.relay(0).unwrap().clone();

        manual.set_uplink(Some(Network::new("lo", "127.0.0.1".parse().unwrap())));
        wait_status(&relay, RelayStatus::Disconnected).await;

        assert!(manual.start(0));
        wait_status(&relay, RelayStatus::Connecting).await;

        assert!(manual.stop(0));
        wait_status(&relay, RelayStatus::Disconnected).await;

        assert!(!manual.start(5));
    }

    #[tokio::test]
    async fn test_update_settings_resizes() {
        let mut manual = ManualRelays::new(
            context(),
            "id",
            "Relay",
            &[ManualSettings::new("ws://127.0.0.1:1", "pw")],
        );
        let first = manual.relay(0).unwrap().clone();

        manual.update_settings(
            "id2",
            "Relay",
            &[
                ManualSettings::new("", "pw"),
                ManualSettings::new("ws://127.0.0.1:2", "pw"),
            ],
        );
        assert_eq!(manual.len(), 2);
        wait_status(&first, RelayStatus::UrlEmpty).await;

        manual.update_settings("id2", "Relay", &[]);
        assert!(manual.is_empty());
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let settings = ManualSettings::new("ws://a:1", "hunter2");
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
