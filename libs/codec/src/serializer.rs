//! Payload serialization
//!
//! The envelope never inspects bodies. A [`PayloadFormat`] turns a typed
//! [`Message`] into body bytes and back, checking that the envelope's opcode
//! is the one the target type claims.

use crate::envelope::Opcode;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Body encoding shared by every process of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Fixed-int little-endian, fields in declaration order
    #[default]
    Bincode,
    /// Self-describing, for debugging with packet captures
    Json,
}

impl PayloadFormat {
    pub fn name(self) -> &'static str {
        match self {
            PayloadFormat::Bincode => "bincode",
            PayloadFormat::Json => "json",
        }
    }

    pub fn encode<M: Message>(self, message: &M) -> ProtocolResult<Bytes> {
        let bytes = match self {
            PayloadFormat::Bincode => bincode::serialize(message)
                .map_err(|e| ProtocolError::payload_encode(M::OPCODE, self.name(), e))?,
            PayloadFormat::Json => serde_json::to_vec(message)
                .map_err(|e| ProtocolError::payload_encode(M::OPCODE, self.name(), e))?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode `body` as `M`, given the opcode the envelope carried
    pub fn decode<M: Message>(self, opcode: Opcode, body: &[u8]) -> ProtocolResult<M> {
        if opcode != M::OPCODE {
            return Err(ProtocolError::OpcodeMismatch {
                expected: M::OPCODE,
                actual: opcode,
                type_name: std::any::type_name::<M>(),
            });
        }
        match self {
            PayloadFormat::Bincode => bincode::deserialize(body)
                .map_err(|e| ProtocolError::payload_decode(opcode, self.name(), e)),
            PayloadFormat::Json => serde_json::from_slice(body)
                .map_err(|e| ProtocolError::payload_decode(opcode, self.name(), e)),
        }
    }
}

impl std::str::FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(PayloadFormat::Bincode),
            "json" => Ok(PayloadFormat::Json),
            other => Err(format!("unknown payload format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{ObjectGetRequest, ObjectGetResponse};
    use crate::message::Response;
    use types::{ActorId, Address, LocationKey, LocationType};

    #[test]
    fn test_both_formats_decode_what_they_encode() {
        let request = ObjectGetRequest {
            location_type: LocationType::new(2),
            key: LocationKey::new(100),
        };
        for format in [PayloadFormat::Bincode, PayloadFormat::Json] {
            let body = format.encode(&request).unwrap();
            let decoded: ObjectGetRequest = format.decode(ObjectGetRequest::OPCODE, &body).unwrap();
            assert_eq!(decoded, request, "{}", format.name());
        }
    }

    #[test]
    fn test_response_error_is_not_part_of_the_body() {
        let mut response = ObjectGetResponse {
            error: 0,
            actor_id: ActorId::new(Address::new(1, 1), 1),
        };
        response.set_error(104_001);
        let body = PayloadFormat::Bincode.encode(&response).unwrap();
        assert_eq!(body.len(), ActorId::SIZE);

        let decoded: ObjectGetResponse = PayloadFormat::Bincode
            .decode(ObjectGetResponse::OPCODE, &body)
            .unwrap();
        assert_eq!(decoded.error, 0);
        assert_eq!(decoded.actor_id, response.actor_id);
    }

    #[test]
    fn test_opcode_mismatch_rejected() {
        let err = PayloadFormat::Bincode
            .decode::<ObjectGetRequest>(1, &[])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::OpcodeMismatch { actual: 1, .. }));
    }

    #[test]
    fn test_garbage_body_rejected() {
        let err = PayloadFormat::Json
            .decode::<ObjectGetRequest>(ObjectGetRequest::OPCODE, b"{not json")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { direction: "decode", .. }));
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<PayloadFormat>().unwrap(), PayloadFormat::Json);
        assert!("xml".parse::<PayloadFormat>().is_err());
    }
}
