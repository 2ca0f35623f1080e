//! Identifier parsing and decoding errors

use thiserror::Error;

/// Errors raised while parsing or decoding identifiers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Buffer ended before the fixed-size identifier was complete
    #[error("Identifier truncated: need {need} bytes, got {got} ({context})")]
    Truncated {
        need: usize,
        got: usize,
        context: &'static str,
    },

    /// Text form did not match `P<process>:F<fiber>[:<instance>]`
    #[error("Invalid identifier '{input}': {reason}")]
    InvalidFormat { input: String, reason: &'static str },
}

impl IdentifierError {
    pub(crate) fn invalid(input: &str, reason: &'static str) -> Self {
        Self::InvalidFormat {
            input: input.to_string(),
            reason,
        }
    }
}
