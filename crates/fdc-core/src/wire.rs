//! Wire protocol for the debug channel.
//!
//! One multiplexed stream carries everything: unsolicited pushes from the
//! controller (entity lifecycle, status, log lines, bulk snapshots),
//! client-issued request/reply calls correlated by `request_id`, and
//! fire-and-forget commands. Frames are newline-delimited JSON; a malformed
//! line is reported per frame and never poisons the stream.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::EntityStatus;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 128 * 1024;
pub const PROTOCOL_VERSION: u16 = 1;

pub const CALL_SUBSCRIBE_LOGS: &str = "subscribe_logs";
pub const CALL_SEARCH_LOGS: &str = "search_logs";
pub const CALL_SEND_STDIN: &str = "send_stdin";
pub const COMMAND_TERMINATE: &str = "terminate";

fn default_version() -> u16 {
    PROTOCOL_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default = "default_version")]
    pub version: u16,
    /// Channel scope, one debug zone per controller connection.
    pub zone: String,
    pub sender: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub msg: Msg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Msg {
    /// Lifecycle push: a new entity started under the controller.
    NewEntity(EntityPayload),
    /// Lifecycle push: the entity is gone; only the identity is meaningful.
    EntityRemoved(EntityRef),
    /// Attribute merge push.
    EntityUpdated(EntityPayload),
    /// Status-only push (still shaped as a payload merge).
    EntityStatus(EntityPayload),
    /// One appended log line for a streaming subscription.
    Log(LogLine),
    /// Bulk enumeration of everything currently known, sent on connect.
    Snapshot(SnapshotPayload),
    /// Client request expecting exactly one correlated `Reply`.
    Request(RequestPayload),
    Reply(ReplyPayload),
    /// Fire-and-forget client command; no reply ever arrives.
    Command(CommandPayload),
}

/// Entity state as announced by the controller. Everything except the
/// identity and status is opaque to the client and merged field-by-field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityPayload {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRef {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub identity: String,
    pub line: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPayload {
    #[serde(default)]
    pub entities: Vec<EntityPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestPayload {
    pub call: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReplyPayload {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl ReplyPayload {
    pub fn into_result(self) -> Result<Value, ReplyError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ReplyError {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandPayload {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeLogsParams {
    pub identity: String,
}

/// Reply body for `subscribe_logs`: the historical buffer accumulated so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeLogsReply {
    #[serde(default)]
    pub stream: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchLogsParams {
    pub query: String,
}

/// Reply body for `search_logs`: identities whose logs matched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchLogsReply {
    #[serde(default)]
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendStdinParams {
    pub identity: String,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminateParams {
    pub identity: String,
    pub hard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too large: {len} bytes (limit {limit})")]
    TooLarge { len: usize, limit: usize },
    #[error("unterminated input exceeds frame limit: {len} bytes (limit {limit})")]
    Unterminated { len: usize, limit: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Serializes one value as a newline-terminated JSON frame.
pub fn encode_line<T: Serialize>(value: &T, limit: usize) -> Result<Vec<u8>, FrameError> {
    let mut bytes = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if bytes.len() > limit {
        return Err(FrameError::TooLarge {
            len: bytes.len(),
            limit,
        });
    }
    bytes.push(b'\n');
    Ok(bytes)
}

/// Incremental newline-delimited JSON decoder.
///
/// Carries partial lines across reads and yields one result per complete
/// line, so a single bad frame costs exactly one error entry.
#[derive(Debug)]
pub struct LineDecoder {
    limit: usize,
    buf: Vec<u8>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl LineDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::new(),
        }
    }

    pub fn feed<T: DeserializeOwned>(&mut self, chunk: &[u8]) -> Vec<Result<T, FrameError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(end) = self.buf.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            if let Some(result) = self.decode_line(&line[..line.len() - 1]) {
                out.push(result);
            }
        }

        if self.buf.len() > self.limit {
            out.push(Err(FrameError::Unterminated {
                len: self.buf.len(),
                limit: self.limit,
            }));
            self.buf.clear();
        }

        out
    }

    /// Decodes whatever is left in the buffer as a final, unterminated frame.
    pub fn finish<T: DeserializeOwned>(&mut self) -> Option<Result<T, FrameError>> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        self.decode_line(&line)
    }

    fn decode_line<T: DeserializeOwned>(&self, line: &[u8]) -> Option<Result<T, FrameError>> {
        let line = match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        };
        if line.is_empty() {
            return None;
        }
        if line.len() > self.limit {
            return Some(Err(FrameError::TooLarge {
                len: line.len(),
                limit: self.limit,
            }));
        }
        Some(serde_json::from_slice(line).map_err(|err| FrameError::Decode(err.to_string())))
    }
}
