//! Protocol-level errors for envelope and payload processing
//!
//! Each variant carries enough context to tell a truncated frame from a peer
//! speaking a different protocol. None of these cross the network: the
//! receiving side logs them and drops the connection, see
//! [`error_code::ERR_PROTOCOL_VIOLATION`](crate::error_code::ERR_PROTOCOL_VIOLATION).

use thiserror::Error;

/// Envelope and payload decoding errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Frame is too small to contain the header for its kind
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// First byte is not a known message kind
    #[error("Unknown message kind {kind}: expected 0 (Message), 1 (Request) or 2 (Response)")]
    UnknownMessageKind { kind: u8 },

    /// Payload was decoded as a type whose opcode does not match the envelope
    #[error("Opcode mismatch: envelope carries {actual}, {type_name} expects {expected}")]
    OpcodeMismatch {
        expected: u16,
        actual: u16,
        type_name: &'static str,
    },

    /// Payload serializer failed
    #[error("Payload {direction} failed for opcode {opcode} ({format}): {reason}")]
    Payload {
        direction: &'static str,
        opcode: u16,
        format: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    pub fn payload_encode(opcode: u16, format: &'static str, reason: impl ToString) -> Self {
        Self::Payload {
            direction: "encode",
            opcode,
            format,
            reason: reason.to_string(),
        }
    }

    pub fn payload_decode(opcode: u16, format: &'static str, reason: impl ToString) -> Self {
        Self::Payload {
            direction: "decode",
            opcode,
            format,
            reason: reason.to_string(),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
