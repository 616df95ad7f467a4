//! Typed wire messages.
//!
//! On the wire every payload rides in a [`SocketMessage`] envelope — a type
//! tag plus the JSON-serialized payload. In process the envelope decodes
//! into the closed [`ServiceMessage`] union and everything dispatches by
//! `match`; there is no runtime type lookup. Unknown tags decode to
//! `Ok(None)` so receivers can log and skip them without disturbing the
//! rest of the stream.

use std::io::{Read, Write};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use hollow_core::settings::SettingNode;
use hollow_core::types::{DepotSyncOptions, DepotSyncResult};

use crate::error::ProtoError;
use crate::frame;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The wire envelope: a type tag plus the payload's own JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocketMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

/// Health snapshot served by the status request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub running: bool,
    pub driver_connected: bool,
    pub started_at_unix: u64,
    pub last_request_unix: u64,
    pub last_modified_unix: u64,
    pub idle_connections: usize,
}

/// A log line streamed ahead of a terminal reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogFrame {
    pub level: String,
    pub line: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NamePayload {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValuePayload {
    value: Option<SettingNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NameValuePayload {
    name: String,
    value: SettingNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct AcceptedPayload {
    accepted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsPayload {
    settings: Vec<(String, SettingNode)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GcRequestPayload {
    idle_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GcReplyPayload {
    closed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoPayload {
    /// Base64 so arbitrary bytes survive the JSON envelope byte-identically.
    payload: String,
}

// ---------------------------------------------------------------------------
// ServiceMessage
// ---------------------------------------------------------------------------

/// Every message either peer may frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    SyncRequest(DepotSyncOptions),
    SyncReply(DepotSyncResult),
    StatusRequest,
    StatusReply(ServiceStatus),
    GetSettingRequest { name: String },
    GetSettingReply { value: Option<SettingNode> },
    SetSettingRequest { name: String, value: SettingNode },
    SetSettingReply { accepted: bool },
    GetAllSettingsRequest,
    GetAllSettingsReply { settings: Vec<(String, SettingNode)> },
    GarbageCollectRequest { idle_seconds: u64 },
    GarbageCollectReply { closed: usize },
    EchoRequest { payload: Vec<u8> },
    EchoReply { payload: Vec<u8> },
    Log(LogFrame),
}

impl ServiceMessage {
    /// The wire type tag for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceMessage::SyncRequest(_) => "Sync",
            ServiceMessage::SyncReply(_) => "SyncResult",
            ServiceMessage::StatusRequest => "ServiceStatus",
            ServiceMessage::StatusReply(_) => "ServiceStatusResult",
            ServiceMessage::GetSettingRequest { .. } => "GetSetting",
            ServiceMessage::GetSettingReply { .. } => "GetSettingResult",
            ServiceMessage::SetSettingRequest { .. } => "SetSetting",
            ServiceMessage::SetSettingReply { .. } => "SetSettingResult",
            ServiceMessage::GetAllSettingsRequest => "GetAllSettings",
            ServiceMessage::GetAllSettingsReply { .. } => "GetAllSettingsResult",
            ServiceMessage::GarbageCollectRequest { .. } => "GarbageCollect",
            ServiceMessage::GarbageCollectReply { .. } => "GarbageCollectResult",
            ServiceMessage::EchoRequest { .. } => "Echo",
            ServiceMessage::EchoReply { .. } => "EchoResult",
            ServiceMessage::Log(_) => "Log",
        }
    }

    /// For a request: the type tag of its terminal reply.
    pub fn expected_reply(&self) -> Option<&'static str> {
        match self {
            ServiceMessage::SyncRequest(_) => Some("SyncResult"),
            ServiceMessage::StatusRequest => Some("ServiceStatusResult"),
            ServiceMessage::GetSettingRequest { .. } => Some("GetSettingResult"),
            ServiceMessage::SetSettingRequest { .. } => Some("SetSettingResult"),
            ServiceMessage::GetAllSettingsRequest => Some("GetAllSettingsResult"),
            ServiceMessage::GarbageCollectRequest { .. } => Some("GarbageCollectResult"),
            ServiceMessage::EchoRequest { .. } => Some("EchoResult"),
            _ => None,
        }
    }

    /// Serialize into the envelope. Serialization failures surface before a
    /// single byte reaches the transport.
    pub fn encode(&self) -> Result<SocketMessage, ProtoError> {
        let data = match self {
            ServiceMessage::SyncRequest(options) => serde_json::to_string(options)?,
            ServiceMessage::SyncReply(result) => serde_json::to_string(result)?,
            ServiceMessage::StatusRequest | ServiceMessage::GetAllSettingsRequest => {
                "{}".to_string()
            }
            ServiceMessage::StatusReply(status) => serde_json::to_string(status)?,
            ServiceMessage::GetSettingRequest { name } => {
                serde_json::to_string(&NamePayload { name: name.clone() })?
            }
            ServiceMessage::GetSettingReply { value } => serde_json::to_string(&ValuePayload {
                value: value.clone(),
            })?,
            ServiceMessage::SetSettingRequest { name, value } => {
                serde_json::to_string(&NameValuePayload {
                    name: name.clone(),
                    value: value.clone(),
                })?
            }
            ServiceMessage::SetSettingReply { accepted } => {
                serde_json::to_string(&AcceptedPayload {
                    accepted: *accepted,
                })?
            }
            ServiceMessage::GetAllSettingsReply { settings } => {
                serde_json::to_string(&SettingsPayload {
                    settings: settings.clone(),
                })?
            }
            ServiceMessage::GarbageCollectRequest { idle_seconds } => {
                serde_json::to_string(&GcRequestPayload {
                    idle_seconds: *idle_seconds,
                })?
            }
            ServiceMessage::GarbageCollectReply { closed } => {
                serde_json::to_string(&GcReplyPayload { closed: *closed })?
            }
            ServiceMessage::EchoRequest { payload } | ServiceMessage::EchoReply { payload } => {
                serde_json::to_string(&EchoPayload {
                    payload: base64::engine::general_purpose::STANDARD.encode(payload),
                })?
            }
            ServiceMessage::Log(frame) => serde_json::to_string(frame)?,
        };
        Ok(SocketMessage {
            kind: self.kind().to_string(),
            data,
        })
    }

    /// Decode an envelope. `Ok(None)` marks an unknown type tag — the
    /// receiver logs it and moves to the next frame. A known tag with a
    /// payload that fails to parse is a broken contract and errors.
    pub fn decode(envelope: &SocketMessage) -> Result<Option<ServiceMessage>, ProtoError> {
        let data = envelope.data.as_str();
        let message = match envelope.kind.as_str() {
            "Sync" => ServiceMessage::SyncRequest(serde_json::from_str(data)?),
            "SyncResult" => ServiceMessage::SyncReply(serde_json::from_str(data)?),
            "ServiceStatus" => ServiceMessage::StatusRequest,
            "ServiceStatusResult" => ServiceMessage::StatusReply(serde_json::from_str(data)?),
            "GetSetting" => {
                let payload: NamePayload = serde_json::from_str(data)?;
                ServiceMessage::GetSettingRequest { name: payload.name }
            }
            "GetSettingResult" => {
                let payload: ValuePayload = serde_json::from_str(data)?;
                ServiceMessage::GetSettingReply {
                    value: payload.value,
                }
            }
            "SetSetting" => {
                let payload: NameValuePayload = serde_json::from_str(data)?;
                ServiceMessage::SetSettingRequest {
                    name: payload.name,
                    value: payload.value,
                }
            }
            "SetSettingResult" => {
                let payload: AcceptedPayload = serde_json::from_str(data)?;
                ServiceMessage::SetSettingReply {
                    accepted: payload.accepted,
                }
            }
            "GetAllSettings" => ServiceMessage::GetAllSettingsRequest,
            "GetAllSettingsResult" => {
                let payload: SettingsPayload = serde_json::from_str(data)?;
                ServiceMessage::GetAllSettingsReply {
                    settings: payload.settings,
                }
            }
            "GarbageCollect" => {
                let payload: GcRequestPayload = serde_json::from_str(data)?;
                ServiceMessage::GarbageCollectRequest {
                    idle_seconds: payload.idle_seconds,
                }
            }
            "GarbageCollectResult" => {
                let payload: GcReplyPayload = serde_json::from_str(data)?;
                ServiceMessage::GarbageCollectReply {
                    closed: payload.closed,
                }
            }
            "Echo" => {
                let payload: EchoPayload = serde_json::from_str(data)?;
                ServiceMessage::EchoRequest {
                    payload: base64::engine::general_purpose::STANDARD.decode(payload.payload)?,
                }
            }
            "EchoResult" => {
                let payload: EchoPayload = serde_json::from_str(data)?;
                ServiceMessage::EchoReply {
                    payload: base64::engine::general_purpose::STANDARD.decode(payload.payload)?,
                }
            }
            "Log" => ServiceMessage::Log(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

// ---------------------------------------------------------------------------
// Framed message I/O
// ---------------------------------------------------------------------------

pub fn write_message<W: Write>(
    writer: &mut W,
    message: &ServiceMessage,
) -> Result<(), ProtoError> {
    let envelope = message.encode()?;
    let payload = serde_json::to_vec(&envelope)?;
    frame::write_frame(writer, &payload)
}

/// Read the next envelope; `Ok(None)` on clean end-of-stream.
pub fn read_envelope<R: Read>(reader: &mut R) -> Result<Option<SocketMessage>, ProtoError> {
    let Some(payload) = frame::read_frame(reader)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&payload)?))
}

pub async fn write_message_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ServiceMessage,
) -> Result<(), ProtoError> {
    let envelope = message.encode()?;
    let payload = serde_json::to_vec(&envelope)?;
    frame::write_frame_async(writer, &payload).await
}

pub async fn read_envelope_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<SocketMessage>, ProtoError> {
    let Some(payload) = frame::read_frame_async(reader).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&payload)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
