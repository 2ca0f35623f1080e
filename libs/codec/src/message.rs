//! Typed message traits
//!
//! Bodies are plain serde structs. The traits attach the opcode and, for
//! requests, the response type, so callers never pass opcodes by hand.

use crate::envelope::Opcode;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Anything that can travel as an envelope body
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const OPCODE: Opcode;
}

/// A message answered by exactly one [`Response`]
pub trait Request: Message {
    type Response: Response;
}

/// A message that answers a [`Request`]
///
/// The error code travels in the envelope header, not the body. `Default`
/// is required so an error-only response can be produced when the handler
/// never ran.
pub trait Response: Message + Default {
    fn error(&self) -> i32;
    fn set_error(&mut self, error: i32);

    fn with_error(error: i32) -> Self {
        let mut response = Self::default();
        response.set_error(error);
        response
    }

    fn is_ok(&self) -> bool {
        self.error() == crate::error_code::ERR_SUCCESS
    }
}

/// Implements [`Message`] for request types and wires the response
#[macro_export]
macro_rules! impl_request {
    ($request:ty => $response:ty, $opcode:expr) => {
        impl $crate::Message for $request {
            const OPCODE: $crate::Opcode = $opcode;
        }

        impl $crate::Request for $request {
            type Response = $response;
        }
    };
}

/// Implements [`Message`] and [`Response`] for a type with an `error: i32` field
#[macro_export]
macro_rules! impl_response {
    ($response:ty, $opcode:expr) => {
        impl $crate::Message for $response {
            const OPCODE: $crate::Opcode = $opcode;
        }

        impl $crate::Response for $response {
            fn error(&self) -> i32 {
                self.error
            }

            fn set_error(&mut self, error: i32) {
                self.error = error;
            }
        }
    };
}

/// Implements [`Message`] for a one-way message type
#[macro_export]
macro_rules! impl_message {
    ($message:ty, $opcode:expr) => {
        impl $crate::Message for $message {
            const OPCODE: $crate::Opcode = $opcode;
        }
    };
}
