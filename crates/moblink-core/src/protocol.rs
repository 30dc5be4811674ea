//! Control channel wire messages.
//!
//! Messages are JSON objects with a single key naming the message type:
//!
//! ```text
//! streamer ──► relay   {"hello":{...}}  {"identified":{...}}  {"request":{...}}
//! relay    ──► streamer {"identify":{...}}  {"response":{...}}
//! ```
//!
//! Field names are camelCase. Absent optional fields are omitted.

use crate::status::ThermalState;
use serde::{Deserialize, Serialize};

/// Marker for empty JSON objects such as `{"ok":{}}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Present {}

/// Outcome of identification or of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageResult {
    /// Success
    Ok(Present),
    /// Authentication token did not match
    WrongPassword(Present),
}

/// Challenge sent by the streamer when the channel opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    /// Streamer protocol version
    pub api_version: String,
    /// Authentication parameters
    pub authentication: Authentication,
}

/// Authentication parameters of a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// Per-connection challenge
    pub challenge: String,
    /// Password salt
    pub salt: String,
}

/// Identification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identified {
    /// Whether the password matched
    pub result: MessageResult,
}

/// Request from the streamer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the response
    pub id: u32,
    /// Request payload
    pub data: RequestData,
}

/// Request payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestData {
    /// Open a UDP tunnel towards `address:port`
    StartTunnel(StartTunnelRequest),
    /// Report battery and thermal status
    Status(Present),
}

/// Tunnel destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTunnelRequest {
    /// Destination host name or IP literal
    pub address: String,
    /// Destination UDP port
    pub port: u16,
}

/// Messages received by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageToRelay {
    /// Authentication challenge
    Hello(Hello),
    /// Identification verdict
    Identified(Identified),
    /// Request to serve
    Request(Request),
}

impl MessageToRelay {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON and unknown message types.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Relay identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Relay identifier
    pub id: String,
    /// Relay name
    pub name: String,
    /// Authentication token, see [`moblink_crypto::auth_token`]
    pub authentication: String,
}

/// Response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request being answered
    pub id: u32,
    /// Outcome
    pub result: MessageResult,
    /// Response payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

/// Response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseData {
    /// Tunnel opened
    StartTunnel(StartTunnelResponse),
    /// Device status
    Status(StatusResponse),
}

/// Port the streamer should send media to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTunnelResponse {
    /// Local port of the streamer-side socket
    pub port: u16,
}

/// Device status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Battery charge, 0-100
    pub battery_percentage: i32,
    /// Thermal bucket, omitted when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal_state: Option<ThermalState>,
}

/// Messages sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageToStreamer {
    /// Answer to [`Hello`]
    Identify(Identify),
    /// Answer to a [`Request`]
    Response(Response),
}

impl MessageToStreamer {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn ok_response(id: u32, data: ResponseData) -> Self {
        Self::Response(Response {
            id,
            result: MessageResult::Ok(Present {}),
            data: Some(data),
        })
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
