//! Wire envelope, opcode/close-code constants, and dispatch event tags (C8).
//!
//! A numeric `{op, d, s?, t?}` envelope over one closed Rust enum covering
//! every dispatch payload, serialized through serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Opcodes ────────────────────────────────────────────────────────────────

pub mod opcode {
    // Client → server
    pub const IDENTIFY: i32 = 0;
    pub const HEARTBEAT: i32 = 1;
    pub const REQUEST_GUILD: i32 = 2;
    pub const SEND_MESSAGE: i32 = 3;
    pub const TYPING_START: i32 = 4;
    pub const PRESENCE_UPDATE: i32 = 5;
    pub const VOICE_STATE_UPDATE: i32 = 6; // reserved, not implemented
    pub const CHANNEL_CREATE: i32 = 7;
    pub const CHANNEL_UPDATE: i32 = 8;
    pub const CHANNEL_DELETE: i32 = 9;
    pub const REQUEST_MESSAGES: i32 = 16;
    pub const ROLE_ASSIGN: i32 = 17;
    pub const ROLE_REMOVE: i32 = 18;
    pub const KICK: i32 = 19;
    pub const BAN: i32 = 20;
    pub const MUTE: i32 = 21;
    pub const WHISPER: i32 = 22;

    // Server → client
    pub const DISPATCH: i32 = 10;
    pub const HEARTBEAT_ACK: i32 = 11;
    pub const HELLO: i32 = 12;
    pub const READY: i32 = 13;
    pub const INVALID_SESSION: i32 = 14;
    pub const RECONNECT: i32 = 15;
    pub const ERROR: i32 = 23;
}

// ─── Close codes ────────────────────────────────────────────────────────────

pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const UNKNOWN: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTH_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMEOUT: u16 = 4009;
}

// ─── Dispatch event tags ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTag {
    READY,
    SERVER_CREATE,
    SERVER_MEMBER_ADD,
    SERVER_MEMBER_REMOVE,
    SERVER_MEMBER_UPDATE,
    CHANNEL_CREATE,
    CHANNEL_UPDATE,
    CHANNEL_DELETE,
    MESSAGE_CREATE,
    MESSAGE_UPDATE,
    MESSAGE_DELETE,
    MESSAGE_REACTION_ADD,
    MESSAGE_REACTION_REMOVE,
    MESSAGES_HISTORY,
    PRESENCE_UPDATE,
    TYPING_START,
    USER_UPDATE,
    ROLE_CREATE,
    ROLE_UPDATE,
    ROLE_DELETE,
    WHISPER_CREATE,
}

impl EventTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::READY => "READY",
            EventTag::SERVER_CREATE => "SERVER_CREATE",
            EventTag::SERVER_MEMBER_ADD => "SERVER_MEMBER_ADD",
            EventTag::SERVER_MEMBER_REMOVE => "SERVER_MEMBER_REMOVE",
            EventTag::SERVER_MEMBER_UPDATE => "SERVER_MEMBER_UPDATE",
            EventTag::CHANNEL_CREATE => "CHANNEL_CREATE",
            EventTag::CHANNEL_UPDATE => "CHANNEL_UPDATE",
            EventTag::CHANNEL_DELETE => "CHANNEL_DELETE",
            EventTag::MESSAGE_CREATE => "MESSAGE_CREATE",
            EventTag::MESSAGE_UPDATE => "MESSAGE_UPDATE",
            EventTag::MESSAGE_DELETE => "MESSAGE_DELETE",
            EventTag::MESSAGE_REACTION_ADD => "MESSAGE_REACTION_ADD",
            EventTag::MESSAGE_REACTION_REMOVE => "MESSAGE_REACTION_REMOVE",
            EventTag::MESSAGES_HISTORY => "MESSAGES_HISTORY",
            EventTag::PRESENCE_UPDATE => "PRESENCE_UPDATE",
            EventTag::TYPING_START => "TYPING_START",
            EventTag::USER_UPDATE => "USER_UPDATE",
            EventTag::ROLE_CREATE => "ROLE_CREATE",
            EventTag::ROLE_UPDATE => "ROLE_UPDATE",
            EventTag::ROLE_DELETE => "ROLE_DELETE",
            EventTag::WHISPER_CREATE => "WHISPER_CREATE",
        }
    }
}

// ─── Envelope ───────────────────────────────────────────────────────────────

/// The wire shape of every frame in either direction: `{op, d, s?, t?}`.
/// `s` and `t` are only populated on outbound dispatch frames (op=10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: i32,
    pub d: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Envelope {
    pub fn new(op: i32, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }

    /// Build a server→client dispatch frame carrying a sequence number and event tag.
    pub fn dispatch(seq: u64, tag: EventTag, d: Value) -> Self {
        Self {
            op: opcode::DISPATCH,
            d,
            s: Some(seq),
            t: Some(tag.as_str().to_string()),
        }
    }

    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(opcode::HELLO, serde_json::json!({ "heartbeat_interval_ms": heartbeat_interval_ms }))
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(opcode::HEARTBEAT_ACK, Value::Null)
    }

    /// In-band error frame. The session stays open.
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::new(
            opcode::ERROR,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|_| DecodeError::MalformedJson)
    }

    pub fn encode(&self) -> String {
        // Envelope fields are controlled internally; serialization cannot fail.
        serde_json::to_string(self).expect("envelope serializes")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MalformedJson,
    UnknownOpcode(i32),
    PayloadShapeMismatch(String),
}

impl DecodeError {
    /// Terminal close code this decode failure maps to, per §4.1.
    pub fn close_code(&self) -> u16 {
        match self {
            DecodeError::MalformedJson => close_code::DECODE_ERROR,
            DecodeError::UnknownOpcode(_) => close_code::UNKNOWN_OPCODE,
            DecodeError::PayloadShapeMismatch(_) => close_code::DECODE_ERROR,
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MalformedJson => write!(f, "malformed JSON frame"),
            DecodeError::UnknownOpcode(op) => write!(f, "unknown opcode {op}"),
            DecodeError::PayloadShapeMismatch(msg) => write!(f, "payload shape mismatch: {msg}"),
        }
    }
}

/// The set of opcodes a server accepts from a client. Anything else is
/// `DecodeError::UnknownOpcode`, closing with 4001.
pub fn is_known_client_opcode(op: i32) -> bool {
    matches!(
        op,
        opcode::IDENTIFY
            | opcode::HEARTBEAT
            | opcode::REQUEST_GUILD
            | opcode::SEND_MESSAGE
            | opcode::TYPING_START
            | opcode::PRESENCE_UPDATE
            | opcode::VOICE_STATE_UPDATE
            | opcode::CHANNEL_CREATE
            | opcode::CHANNEL_UPDATE
            | opcode::CHANNEL_DELETE
            | opcode::REQUEST_MESSAGES
            | opcode::ROLE_ASSIGN
            | opcode::ROLE_REMOVE
            | opcode::KICK
            | opcode::BAN
            | opcode::MUTE
            | opcode::WHISPER
    )
}

/// Deserialize `d` into `T`, mapping any failure to a payload shape mismatch.
pub fn parse_payload<T: serde::de::DeserializeOwned>(d: &Value) -> Result<T, DecodeError> {
    serde_json::from_value(d.clone()).map_err(|e| DecodeError::PayloadShapeMismatch(e.to_string()))
}
