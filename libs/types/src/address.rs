//! Address and ActorId
//!
//! Both types are plain `Copy` values. Equality and hashing are structural,
//! which is what makes them usable as map keys on both sides of the wire.

use crate::error::IdentifierError;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single-threaded execution unit (fiber) inside a process
///
/// Immutable once assigned and stable for the fiber's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address {
    pub process: i32,
    pub fiber: i32,
}

impl Address {
    /// Encoded size in bytes
    pub const SIZE: usize = 8;

    pub const fn new(process: i32, fiber: i32) -> Self {
        Self { process, fiber }
    }

    /// Write the address in declaration order, little-endian
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.process);
        buf.put_i32_le(self.fiber);
    }

    /// Read an address previously written by [`Address::write_to`]
    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self, IdentifierError> {
        if buf.remaining() < Self::SIZE {
            return Err(IdentifierError::Truncated {
                need: Self::SIZE,
                got: buf.remaining(),
                context: "Address",
            });
        }
        Ok(Self {
            process: buf.get_i32_le(),
            fiber: buf.get_i32_le(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}:F{}", self.process, self.fiber)
    }
}

impl FromStr for Address {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(p), Some(f), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(IdentifierError::invalid(s, "expected P<process>:F<fiber>"));
        };
        Ok(Self {
            process: parse_prefixed(s, p, 'P')?,
            fiber: parse_prefixed(s, f, 'F')?,
        })
    }
}

/// A specific actor instance reachable at an [`Address`]
///
/// `instance` disambiguates successive actors reusing the same address. The
/// all-zero value is reserved as "no actor".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ActorId {
    pub address: Address,
    pub instance: i64,
}

impl ActorId {
    /// Encoded size in bytes
    pub const SIZE: usize = Address::SIZE + 8;

    /// The reserved "no actor" value
    pub const NONE: ActorId = ActorId {
        address: Address::new(0, 0),
        instance: 0,
    };

    pub const fn new(address: Address, instance: i64) -> Self {
        Self { address, instance }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn process(&self) -> i32 {
        self.address.process
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        self.address.write_to(buf);
        buf.put_i64_le(self.instance);
    }

    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self, IdentifierError> {
        if buf.remaining() < Self::SIZE {
            return Err(IdentifierError::Truncated {
                need: Self::SIZE,
                got: buf.remaining(),
                context: "ActorId",
            });
        }
        let address = Address::read_from(buf)?;
        Ok(Self {
            address,
            instance: buf.get_i64_le(),
        })
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.instance)
    }
}

impl FromStr for ActorId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, instance) = s
            .rsplit_once(':')
            .ok_or_else(|| IdentifierError::invalid(s, "expected P<process>:F<fiber>:<instance>"))?;
        let instance = instance
            .parse::<i64>()
            .map_err(|_| IdentifierError::invalid(s, "instance is not an integer"))?;
        Ok(Self {
            address: address.parse()?,
            instance,
        })
    }
}

fn parse_prefixed(input: &str, part: &str, prefix: char) -> Result<i32, IdentifierError> {
    part.strip_prefix(prefix)
        .ok_or_else(|| IdentifierError::invalid(input, "missing P/F prefix"))?
        .parse::<i32>()
        .map_err(|_| IdentifierError::invalid(input, "component is not an integer"))
}
