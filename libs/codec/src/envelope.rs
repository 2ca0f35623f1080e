//! # Wire Envelope
//!
//! Every frame exchanged over a session is one envelope:
//!
//! ```text
//! ┌─────────┬──────────────┬────────────────┬───────────────┬──────────┐
//! │ kind:u8 │ opcode:u16   │ rpc_id:u32     │ error:i32     │ body ... │
//! │         │              │ Request/Resp.  │ Response only │          │
//! └─────────┴──────────────┴────────────────┴───────────────┴──────────┘
//! ```
//!
//! Integers are little-endian. The body is opaque here; it is produced by a
//! [`PayloadFormat`](crate::PayloadFormat) given the opcode as type tag.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Message type tag carried in every envelope
pub type Opcode = u16;

/// First byte of every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    /// One-way, no correlation id
    Message = 0,
    Request = 1,
    Response = 2,
}

impl MessageKind {
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Message => "Message",
            MessageKind::Request => "Request",
            MessageKind::Response => "Response",
        }
    }

    /// Header length for this kind, body excluded
    pub const fn header_len(self) -> usize {
        match self {
            MessageKind::Message => 3,
            MessageKind::Request => 7,
            MessageKind::Response => 11,
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub opcode: Opcode,
    /// Zero for one-way messages
    pub rpc_id: u32,
    /// Always [`ERR_SUCCESS`](crate::error_code::ERR_SUCCESS) unless `kind` is Response
    pub error: i32,
    pub body: Bytes,
}

impl Envelope {
    pub fn message(opcode: Opcode, body: Bytes) -> Self {
        Self {
            kind: MessageKind::Message,
            opcode,
            rpc_id: 0,
            error: 0,
            body,
        }
    }

    pub fn request(opcode: Opcode, rpc_id: u32, body: Bytes) -> Self {
        Self {
            kind: MessageKind::Request,
            opcode,
            rpc_id,
            error: 0,
            body,
        }
    }

    pub fn response(opcode: Opcode, rpc_id: u32, error: i32, body: Bytes) -> Self {
        Self {
            kind: MessageKind::Response,
            opcode,
            rpc_id,
            error,
            body,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.kind.header_len() + self.body.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.kind.into());
        buf.put_u16_le(self.opcode);
        match self.kind {
            MessageKind::Message => {}
            MessageKind::Request => buf.put_u32_le(self.rpc_id),
            MessageKind::Response => {
                buf.put_u32_le(self.rpc_id);
                buf.put_i32_le(self.error);
            }
        }
        buf.put_slice(&self.body);
    }

    /// Decode one frame; the body shares the frame's allocation
    pub fn decode(mut frame: Bytes) -> ProtocolResult<Self> {
        if frame.is_empty() {
            return Err(ProtocolError::message_too_small(1, 0, "envelope kind"));
        }
        let raw_kind = frame[0];
        let kind = MessageKind::try_from(raw_kind)
            .map_err(|_| ProtocolError::UnknownMessageKind { kind: raw_kind })?;

        let need = kind.header_len();
        if frame.len() < need {
            return Err(ProtocolError::message_too_small(
                need,
                frame.len(),
                format!("{} header", kind.name()),
            ));
        }

        frame.advance(1);
        let opcode = frame.get_u16_le();
        let (rpc_id, error) = match kind {
            MessageKind::Message => (0, 0),
            MessageKind::Request => (frame.get_u32_le(), 0),
            MessageKind::Response => {
                let rpc_id = frame.get_u32_le();
                (rpc_id, frame.get_i32_le())
            }
        };

        Ok(Self {
            kind,
            opcode,
            rpc_id,
            error,
            body: frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_response_header_layout() {
        let env = Envelope::response(0x0102, 7, -2, Bytes::from_static(b"xy"));
        let bytes = env.encode();

        assert_eq!(
            &bytes[..],
            &[2, 0x02, 0x01, 7, 0, 0, 0, 0xFE, 0xFF, 0xFF, 0xFF, b'x', b'y']
        );
        assert_eq!(Envelope::decode(bytes).unwrap(), env);
    }

    #[test]
    fn test_message_has_no_rpc_id() {
        let env = Envelope::message(10_001, Bytes::from_static(b"hello"));
        let bytes = env.encode();
        assert_eq!(bytes.len(), 3 + 5);

        let decoded = Envelope::decode(bytes).unwrap();
        assert_eq!(decoded.kind, MessageKind::Message);
        assert_eq!(decoded.rpc_id, 0);
        assert_eq!(&decoded.body[..], b"hello");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Envelope::decode(Bytes::from_static(&[9, 0, 0])).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageKind { kind: 9 });
    }

    #[test]
    fn test_truncated_header_rejected() {
        let err = Envelope::decode(Bytes::from_static(&[1, 0, 0, 1])).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MessageTooSmall { need: 7, got: 4, .. }
        ));
        assert!(Envelope::decode(Bytes::new()).is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Envelope::decode(Bytes::from(data));
        }

        #[test]
        fn prop_request_preserves_fields(opcode in any::<u16>(), rpc_id in any::<u32>(), body in proptest::collection::vec(any::<u8>(), 0..32)) {
            let env = Envelope::request(opcode, rpc_id, Bytes::from(body));
            prop_assert_eq!(Envelope::decode(env.encode()).unwrap(), env);
        }
    }
}
