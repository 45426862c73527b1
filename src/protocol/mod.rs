//! Protocol State Machine (C4, §4.4): the line-based control protocol and
//! its message types. [`handshake`] carries the `ACT`/`CFG` negotiation;
//! [`archive`] carries the directory packer (C8).

pub mod archive;
pub mod handshake;

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::carrier::{LineBuffer, ReadLinePolicy};
use crate::error::TrzError;
use crate::model::Dialect;

/// Short uppercase tag preceding every control message, `#<TYPE>:<payload>\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Act,
    Cfg,
    Num,
    Name,
    Size,
    Data,
    Md5,
    Succ,
    Exit,
    /// `fail` — soft failure, not traceable on the peer.
    Fail,
    /// `FAIL` — traceable local failure.
    FatalFail,
}

impl MessageType {
    pub fn as_tag(self) -> &'static str {
        match self {
            MessageType::Act => "ACT",
            MessageType::Cfg => "CFG",
            MessageType::Num => "NUM",
            MessageType::Name => "NAME",
            MessageType::Size => "SIZE",
            MessageType::Data => "DATA",
            MessageType::Md5 => "MD5",
            MessageType::Succ => "SUCC",
            MessageType::Exit => "EXIT",
            MessageType::Fail => "fail",
            MessageType::FatalFail => "FAIL",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "ACT" => MessageType::Act,
            "CFG" => MessageType::Cfg,
            "NUM" => MessageType::Num,
            "NAME" => MessageType::Name,
            "SIZE" => MessageType::Size,
            "DATA" => MessageType::Data,
            "MD5" => MessageType::Md5,
            "SUCC" => MessageType::Succ,
            "EXIT" => MessageType::Exit,
            "fail" => MessageType::Fail,
            "FAIL" => MessageType::FatalFail,
            _ => return None,
        })
    }
}

/// A parsed control line, before its payload has been interpreted according
/// to its type's specific grammar.
#[derive(Debug, Clone)]
pub struct ControlLine {
    pub msg_type: MessageType,
    pub payload: String,
}

/// Write one control line: `#<TYPE>:<payload>` followed by the dialect's
/// line terminator.
pub async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    dialect: Dialect,
    msg_type: MessageType,
    payload: &str,
) -> io::Result<()> {
    let body = format!("#{}:{}", msg_type.as_tag(), payload);
    let bytes = crate::carrier::adapters::send_line(&body, dialect);
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read and parse one control line from the line buffer.
pub async fn read_line(
    lb: &LineBuffer,
    policy: ReadLinePolicy,
    deadline: Option<Duration>,
) -> Result<ControlLine, TrzError> {
    let raw = lb.read_line(policy, deadline).await?;
    let text = String::from_utf8(raw).map_err(|e| TrzError::Protocol(format!("non-utf8 line: {e}")))?;
    let rest = text
        .strip_prefix('#')
        .ok_or_else(|| TrzError::Protocol(format!("missing leading '#' in {text:?}")))?;
    let (tag, payload) = rest
        .split_once(':')
        .ok_or_else(|| TrzError::Protocol(format!("missing ':' in {text:?}")))?;
    let msg_type = MessageType::from_tag(tag)
        .ok_or_else(|| TrzError::Protocol(format!("unknown message type {tag:?}")))?;
    Ok(ControlLine {
        msg_type,
        payload: payload.to_string(),
    })
}

/// Write a `DATA` frame in binary mode: decimal length, newline, then
/// exactly that many already-escaped bytes with no trailing delimiter.
pub async fn write_binary_data<W: AsyncWrite + Unpin>(
    writer: &mut W,
    escaped: &[u8],
) -> io::Result<()> {
    writer.write_all(format!("#DATA:{}\n", escaped.len()).as_bytes()).await?;
    writer.write_all(escaped).await?;
    writer.flush().await
}

/// Read a binary `DATA` frame's length line, then exactly that many raw
/// (still-escaped) bytes.
pub async fn read_binary_data(
    lb: &LineBuffer,
    policy: ReadLinePolicy,
    deadline: Option<Duration>,
) -> Result<Vec<u8>, TrzError> {
    let header = lb.read_line(policy, deadline).await?;
    let text = String::from_utf8(header).map_err(|e| TrzError::Protocol(format!("non-utf8 DATA header: {e}")))?;
    let rest = text
        .strip_prefix("#DATA:")
        .ok_or_else(|| TrzError::Protocol(format!("expected #DATA: header, got {text:?}")))?;
    let len: usize = rest
        .parse()
        .map_err(|e| TrzError::Protocol(format!("bad DATA length {rest:?}: {e}")))?;
    lb.read_binary(len, deadline).await
}

/// Generic acknowledgment (`SUCC`): either an echoed value, an
/// intermediate `<len>/<saved>` progress pair, or an empty pause heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Succ {
    Value(String),
    Progress { len: u64, saved: u64 },
    Heartbeat,
}

impl Succ {
    pub fn encode(&self) -> String {
        match self {
            Succ::Value(v) => v.clone(),
            Succ::Progress { len, saved } => format!("{len}/{saved}"),
            Succ::Heartbeat => "=".to_string(),
        }
    }

    pub fn decode(payload: &str) -> Self {
        if payload == "=" {
            return Succ::Heartbeat;
        }
        if let Some((len, saved)) = payload.split_once('/') {
            if let (Ok(len), Ok(saved)) = (len.parse(), saved.parse()) {
                return Succ::Progress { len, saved };
            }
        }
        Succ::Value(payload.to_string())
    }
}

/// Per-entry metadata sent as `NAME` in directory mode (§4.4): a JSON-like
/// object carrying path-id, relative-path, and the entry's flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameMessage {
    pub path_id: u64,
    pub relative_path: Vec<String>,
    pub is_dir: bool,
    pub archive: bool,
    pub permissions: u32,
    pub size: u64,
}

impl NameMessage {
    pub fn encode(&self) -> Result<String, TrzError> {
        let json = serde_json::to_vec(self).map_err(|e| TrzError::Protocol(e.to_string()))?;
        Ok(crate::codec::short_field_encode(&json))
    }

    pub fn decode(payload: &str) -> Result<Self, TrzError> {
        let bytes = crate::codec::short_field_decode(payload)?;
        serde_json::from_slice(&bytes).map_err(|e| TrzError::Corrupt(format!("NAME json: {e}")))
    }
}

/// `EXIT` / `fail` / `FAIL` carry a human message, optionally short-field
/// encoded (per the reference dialect, plain text is also accepted).
pub fn encode_message_payload(message: &str) -> String {
    crate::codec::short_field_encode(message.as_bytes())
}

pub fn decode_message_payload(payload: &str) -> Result<String, TrzError> {
    match crate::codec::short_field_decode(payload) {
        Ok(bytes) => String::from_utf8(bytes).map_err(|e| TrzError::Corrupt(e.to_string())),
        Err(_) => Ok(payload.to_string()),
    }
}
