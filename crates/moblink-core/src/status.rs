//! Relay and aggregate status.
//!
//! Status strings are shown to the operator verbatim, so their text is part
//! of the interface. Both [`RelayStatus`] and [`AutomaticStatus`] are derived
//! from session flags with a first-match-wins precedence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device temperature bucket, ordered from coolest to hottest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThermalState {
    /// Normal operation
    #[serde(rename = "white")]
    Quiet,
    /// Throttling likely
    #[serde(rename = "yellow")]
    Warm,
    /// Throttling or shutdown imminent
    #[serde(rename = "red")]
    Hot,
}

/// Platform thermal severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThermalSeverity {
    /// No throttling
    None,
    /// Light throttling
    Light,
    /// Moderate throttling
    Moderate,
    /// Severe throttling
    Severe,
    /// Platform is doing everything it can
    Critical,
    /// Key components shutting down
    Emergency,
    /// Device shutting down
    Shutdown,
}

impl From<ThermalSeverity> for ThermalState {
    fn from(severity: ThermalSeverity) -> Self {
        match severity {
            ThermalSeverity::None => Self::Quiet,
            ThermalSeverity::Light | ThermalSeverity::Moderate => Self::Warm,
            ThermalSeverity::Severe
            | ThermalSeverity::Critical
            | ThermalSeverity::Emergency
            | ThermalSeverity::Shutdown => Self::Hot,
        }
    }
}

/// Battery and thermal snapshot reported to the streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Battery charge, 0-100
    pub battery_percentage: i32,
    /// Thermal bucket if known
    pub thermal_state: Option<ThermalState>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            battery_percentage: 100,
            thermal_state: None,
        }
    }
}

/// Source of device status.
///
/// Called from the relay task, so implementations must not block for long.
pub trait StatusSource: Send + Sync {
    /// Current battery and thermal status.
    fn snapshot(&self) -> StatusSnapshot;
}

/// Status source returning a fixed snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedStatus(pub StatusSnapshot);

impl StatusSource for FixedStatus {
    fn snapshot(&self) -> StatusSnapshot {
        self.0
    }
}

/// Status of a single relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStatus {
    /// No streamer URL configured
    UrlEmpty,
    /// No password configured
    PasswordEmpty,
    /// Uplink unavailable
    WaitingForUplink,
    /// Identified by the streamer
    Connected,
    /// Streamer rejected the password
    WrongPassword,
    /// Started, not yet identified
    Connecting,
    /// Not started
    Disconnected,
}

/// Inputs of [`RelayStatus::evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct RelayFlags<'a> {
    /// URL of the current endpoint
    pub url: &'a str,
    /// Configured password
    pub password: &'a str,
    /// Whether a data-plane network is bound
    pub data_plane_available: bool,
    /// Identified by the streamer
    pub connected: bool,
    /// Password rejected
    pub wrong_password: bool,
    /// Relay started
    pub started: bool,
}

impl RelayStatus {
    /// Derive the status, first match wins.
    #[must_use]
    pub fn evaluate(flags: &RelayFlags<'_>) -> Self {
        if flags.url.is_empty() {
            Self::UrlEmpty
        } else if flags.password.is_empty() {
            Self::PasswordEmpty
        } else if !flags.data_plane_available {
            Self::WaitingForUplink
        } else if flags.connected {
            Self::Connected
        } else if flags.wrong_password {
            Self::WrongPassword
        } else if flags.started {
            Self::Connecting
        } else {
            Self::Disconnected
        }
    }

    /// Check if the relay is identified by its streamer.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UrlEmpty => "Streamer URL empty",
            Self::PasswordEmpty => "Password empty",
            Self::WaitingForUplink => "Waiting for cellular",
            Self::Connected => "Connected to streamer",
            Self::WrongPassword => "Wrong password",
            Self::Connecting => "Connecting to streamer",
            Self::Disconnected => "Disconnected from streamer",
        };
        f.write_str(text)
    }
}

/// Aggregate status of automatic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomaticStatus {
    /// Automatic mode stopped
    NotStarted,
    /// Uplink unavailable
    WaitingForUplink,
    /// At least one streamer discovered
    Connected {
        /// Relays identified by their streamer
        connected: usize,
        /// All relays
        total: usize,
    },
    /// Nothing discovered yet
    Searching,
}

impl AutomaticStatus {
    /// Derive the aggregate status, first match wins.
    pub fn evaluate<I>(started: bool, uplink_available: bool, relays: I) -> Self
    where
        I: IntoIterator<Item = RelayStatus>,
    {
        if !started {
            return Self::NotStarted;
        }
        if !uplink_available {
            return Self::WaitingForUplink;
        }
        let (connected, total) = relays
            .into_iter()
            .fold((0, 0), |(connected, total), status| {
                (connected + usize::from(status.is_connected()), total + 1)
            });
        if total > 0 {
            Self::Connected { connected, total }
        } else {
            Self::Searching
        }
    }
}

impl fmt::Display for AutomaticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("Not started"),
            Self::WaitingForUplink => f.write_str("Waiting for cellular"),
            Self::Connected { connected, total } => {
                write!(f, "Connected to {connected} of {total} streamers")
            }
            Self::Searching => f.write_str("Searching for streamers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flags<'a>(url: &'a str, password: &'a str) -> RelayFlags<'a> {
        RelayFlags {
            url,
            password,
            data_plane_available: true,
            connected: false,
            wrong_password: false,
            started: false,
        }
    }

    #[test]
    fn test_relay_status_precedence() {
        assert_eq!(
            RelayStatus::evaluate(&flags("", "x")).to_string(),
            "Streamer URL empty"
        );
        assert_eq!(
            RelayStatus::evaluate(&flags("y", "")).to_string(),
            "Password empty"
        );

        let mut f = flags("y", "x");
        f.data_plane_available = false;
        f.connected = true;
        assert_eq!(RelayStatus::evaluate(&f).to_string(), "Waiting for cellular");

        f.data_plane_available = true;
        assert_eq!(RelayStatus::evaluate(&f).to_string(), "Connected to streamer");

        f.connected = false;
        f.wrong_password = true;
        f.started = true;
        assert_eq!(RelayStatus::evaluate(&f).to_string(), "Wrong password");

        f.wrong_password = false;
        assert_eq!(RelayStatus::evaluate(&f).to_string(), "Connecting to streamer");

        f.started = false;
        assert_eq!(
            RelayStatus::evaluate(&f).to_string(),
            "Disconnected from streamer"
        );
    }

    #[test]
    fn test_automatic_status() {
        assert_eq!(
            AutomaticStatus::evaluate(false, true, [RelayStatus::Connected]).to_string(),
            "Not started"
        );
        assert_eq!(
            AutomaticStatus::evaluate(true, false, [RelayStatus::Connected]).to_string(),
            "Waiting for cellular"
        );
        assert_eq!(
            AutomaticStatus::evaluate(
                true,
                true,
                [
                    RelayStatus::Connected,
                    RelayStatus::Connecting,
                    RelayStatus::WrongPassword
                ]
            )
            .to_string(),
            "Connected to 1 of 3 streamers"
        );
        assert_eq!(
            AutomaticStatus::evaluate(true, true, []).to_string(),
            "Searching for streamers"
        );
    }

    #[test]
    fn test_thermal_mapping() {
        assert_eq!(ThermalState::from(ThermalSeverity::None), ThermalState::Quiet);
        assert_eq!(ThermalState::from(ThermalSeverity::Light), ThermalState::Warm);
        assert_eq!(ThermalState::from(ThermalSeverity::Moderate), ThermalState::Warm);
        assert_eq!(ThermalState::from(ThermalSeverity::Severe), ThermalState::Hot);
        assert_eq!(ThermalState::from(ThermalSeverity::Shutdown), ThermalState::Hot);
        assert!(ThermalState::Quiet < ThermalState::Warm);
        assert!(ThermalState::Warm < ThermalState::Hot);
    }

    #[test]
    fn test_thermal_wire_names() {
        assert_eq!(serde_json::to_string(&ThermalState::Quiet).unwrap(), "\"white\"");
        assert_eq!(serde_json::to_string(&ThermalState::Warm).unwrap(), "\"yellow\"");
        assert_eq!(serde_json::to_string(&ThermalState::Hot).unwrap(), "\"red\"");
    }

    proptest! {
        #[test]
        fn prop_empty_url_always_wins(
            password in ".*",
            data_plane_available: bool,
            connected: bool,
            wrong_password: bool,
            started: bool,
        ) {
            let status = RelayStatus::evaluate(&RelayFlags {
                url: "",
                password: &password,
                data_plane_available,
                connected,
                wrong_password,
                started,
            });
            prop_assert_eq!(status, RelayStatus::UrlEmpty);
        }

        #[test]
        fn prop_connected_count_bounded(statuses in prop::collection::vec(0u8..7, 0..16)) {
            let relays: Vec<RelayStatus> = statuses
                .iter()
                .map(|n| match n {
                    0 => RelayStatus::UrlEmpty,
                    1 => RelayStatus::PasswordEmpty,
                    2 => RelayStatus::WaitingForUplink,
                    3 => RelayStatus::Connected,
                    4 => RelayStatus::WrongPassword,
                    5 => RelayStatus::Connecting,
                    _ => RelayStatus::Disconnected,
                })
                .collect();
            let expected = relays.iter().filter(|s| s.is_connected()).count();
            match AutomaticStatus::evaluate(true, true, relays.clone()) {
                AutomaticStatus::Connected { connected, total } => {
                    prop_assert_eq!(connected, expected);
                    prop_assert_eq!(total, relays.len());
                }
                AutomaticStatus::Searching => prop_assert!(relays.is_empty()),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
