//! Transport Error Types
//!
//! Local failures of the network layer. Anything that has to cross a session
//! or a fiber boundary is reduced to its wire code with [`TransportError::code`].

use codec::error_code;
use codec::{Opcode, ProtocolError};
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket-level failure
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Envelope or payload could not be processed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// An RPC finished without a response
    #[error("RPC {opcode} (rpc_id {rpc_id}) failed: {} ({code})", code_name(.code))]
    Rpc { code: i32, opcode: Opcode, rpc_id: u32 },

    /// Session was already disposed when the operation started
    #[error("Session {channel_id} disposed: {} ({code})", code_name(.code))]
    SessionDisposed { channel_id: u32, code: i32 },

    /// Frame exceeds the configured limit
    #[error("Frame of {size} bytes exceeds maximum {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Handler registration conflict
    #[error("Handler already registered for opcode {opcode}")]
    DuplicateHandler { opcode: Opcode },
}

fn code_name(code: &i32) -> &'static str {
    error_code::describe(*code)
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn network_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Wire error code for this failure
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Network { .. } => error_code::ERR_SOCKET_SEND,
            TransportError::Protocol(_) => error_code::ERR_PAYLOAD_DECODE,
            TransportError::Configuration { .. } => error_code::ERR_SERVICE_DISPOSED,
            TransportError::Rpc { code, .. } => *code,
            TransportError::SessionDisposed { code, .. } => *code,
            TransportError::FrameTooLarge { .. } => error_code::ERR_FRAME_TOO_LARGE,
            TransportError::DuplicateHandler { .. } => error_code::ERR_HANDLER_FAILED,
        }
    }

    /// Whether the operation ended because a cancellation signal fired
    pub fn is_cancelled(&self) -> bool {
        error_code::is_cancellation(self.code())
    }

    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Protocol(_) => "protocol",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Rpc { .. } => "rpc",
            TransportError::SessionDisposed { .. } => "session",
            TransportError::FrameTooLarge { .. } => "frame",
            TransportError::DuplicateHandler { .. } => "dispatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_keeps_wire_code() {
        let err = TransportError::Rpc {
            code: error_code::ERR_RPC_TIMEOUT,
            opcode: 1003,
            rpc_id: 9,
        };
        assert_eq!(err.code(), error_code::ERR_RPC_TIMEOUT);
        assert!(err.to_string().contains("rpc timeout"));
        assert!(!err.is_cancelled());

        let cancelled = TransportError::Rpc {
            code: error_code::ERR_RPC_CANCELLED,
            opcode: 1003,
            rpc_id: 10,
        };
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: TransportError = ProtocolError::UnknownMessageKind { kind: 7 }.into();
        assert_eq!(err.category(), "protocol");
    }
}
