//! Blocking service client.
//!
//! Mirrors the console side of the protocol: every command opens a fresh
//! loopback socket, writes one request frame, then keeps reading frames
//! until the terminal reply for that request arrives or the socket closes.
//! `Log` frames are re-emitted through the local `tracing` logger as they
//! stream in; unknown types are logged and skipped.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};

use hollow_core::settings::SettingNode;
use hollow_core::types::{DepotSyncOptions, DepotSyncResult};

use crate::error::{io_err, ProtoError};
use crate::message::{self, LogFrame, ServiceMessage, ServiceStatus};

/// A handle on the loopback service endpoint. Cheap to construct; holds no
/// connection between calls.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    port: u16,
}

impl ServiceClient {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Send one request and collect every non-log frame up to and including
    /// the terminal reply.
    pub fn send_command(&self, request: &ServiceMessage) -> Result<Vec<ServiceMessage>, ProtoError> {
        let expected = request
            .expected_reply()
            .ok_or_else(|| ProtoError::NotARequest {
                kind: request.kind(),
            })?;

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let mut stream = TcpStream::connect(addr).map_err(|e| io_err("service connect", e))?;
        message::write_message(&mut stream, request)?;

        let mut collected = Vec::new();
        while let Some(envelope) = message::read_envelope(&mut stream)? {
            match ServiceMessage::decode(&envelope)? {
                None => {
                    tracing::error!(kind = %envelope.kind, "ignoring unknown message type");
                }
                Some(ServiceMessage::Log(frame)) => emit_log(&frame),
                Some(reply) => {
                    let done = reply.kind() == expected;
                    collected.push(reply);
                    if done {
                        return Ok(collected);
                    }
                }
            }
        }
        Err(ProtoError::MissingReply { expected })
    }

    // -- typed helpers ------------------------------------------------------

    pub fn sync(&self, options: DepotSyncOptions) -> Result<DepotSyncResult, ProtoError> {
        let replies = self.send_command(&ServiceMessage::SyncRequest(options))?;
        for reply in replies {
            if let ServiceMessage::SyncReply(result) = reply {
                return Ok(result);
            }
        }
        Err(ProtoError::MissingReply {
            expected: "SyncResult",
        })
    }

    pub fn status(&self) -> Result<ServiceStatus, ProtoError> {
        match self.send_command(&ServiceMessage::StatusRequest)?.pop() {
            Some(ServiceMessage::StatusReply(status)) => Ok(status),
            Some(other) => Err(ProtoError::UnexpectedReply {
                kind: other.kind().to_string(),
            }),
            None => Err(ProtoError::MissingReply {
                expected: "ServiceStatusResult",
            }),
        }
    }

    pub fn get_setting(&self, name: &str) -> Result<Option<SettingNode>, ProtoError> {
        match self
            .send_command(&ServiceMessage::GetSettingRequest {
                name: name.to_string(),
            })?
            .pop()
        {
            Some(ServiceMessage::GetSettingReply { value }) => Ok(value),
            Some(other) => Err(ProtoError::UnexpectedReply {
                kind: other.kind().to_string(),
            }),
            None => Err(ProtoError::MissingReply {
                expected: "GetSettingResult",
            }),
        }
    }

    pub fn set_setting(&self, name: &str, value: SettingNode) -> Result<bool, ProtoError> {
        match self
            .send_command(&ServiceMessage::SetSettingRequest {
                name: name.to_string(),
                value,
            })?
            .pop()
        {
            Some(ServiceMessage::SetSettingReply { accepted }) => Ok(accepted),
            Some(other) => Err(ProtoError::UnexpectedReply {
                kind: other.kind().to_string(),
            }),
            None => Err(ProtoError::MissingReply {
                expected: "SetSettingResult",
            }),
        }
    }

    pub fn get_all_settings(&self) -> Result<Vec<(String, SettingNode)>, ProtoError> {
        match self.send_command(&ServiceMessage::GetAllSettingsRequest)?.pop() {
            Some(ServiceMessage::GetAllSettingsReply { settings }) => Ok(settings),
            Some(other) => Err(ProtoError::UnexpectedReply {
                kind: other.kind().to_string(),
            }),
            None => Err(ProtoError::MissingReply {
                expected: "GetAllSettingsResult",
            }),
        }
    }

    /// Explicit, synchronous idle-connection sweep on the service.
    pub fn garbage_collect(&self, idle_seconds: u64) -> Result<usize, ProtoError> {
        match self
            .send_command(&ServiceMessage::GarbageCollectRequest { idle_seconds })?
            .pop()
        {
            Some(ServiceMessage::GarbageCollectReply { closed }) => Ok(closed),
            Some(other) => Err(ProtoError::UnexpectedReply {
                kind: other.kind().to_string(),
            }),
            None => Err(ProtoError::MissingReply {
                expected: "GarbageCollectResult",
            }),
        }
    }

    /// Reflect arbitrary bytes off the service (wire self-test).
    pub fn echo(&self, payload: &[u8]) -> Result<Vec<u8>, ProtoError> {
        match self
            .send_command(&ServiceMessage::EchoRequest {
                payload: payload.to_vec(),
            })?
            .pop()
        {
            Some(ServiceMessage::EchoReply { payload }) => Ok(payload),
            Some(other) => Err(ProtoError::UnexpectedReply {
                kind: other.kind().to_string(),
            }),
            None => Err(ProtoError::MissingReply { expected: "EchoResult" }),
        }
    }
}

fn emit_log(frame: &LogFrame) {
    match frame.level.as_str() {
        "error" => tracing::error!(remote = true, "{}", frame.line),
        "warn" => tracing::warn!(remote = true, "{}", frame.line),
        "debug" => tracing::debug!(remote = true, "{}", frame.line),
        _ => tracing::info!(remote = true, "{}", frame.line),
    }
}
