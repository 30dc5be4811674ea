//! Multi-relay orchestration.
//!
//! - [`Orchestrator`]: automatic mode. One relay per discovered streamer,
//!   endpoints of the same streamer seen on several networks are merged.
//! - [`ManualRelays`]: manual mode. One relay per configured streamer.

mod automatic;
mod manual;

pub use automatic::Orchestrator;
pub use manual::{ManualRelays, ManualSettings};
