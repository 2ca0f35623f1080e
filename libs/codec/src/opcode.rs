//! Opcode allocation
//!
//! | Range        | Owner                        |
//! |--------------|------------------------------|
//! | 1..=999      | system                       |
//! | 1000..=1999  | location registry            |
//! | 2000..=2999  | actor routing                |
//! | 10000..      | application                  |

use crate::envelope::Opcode;
use std::ops::RangeInclusive;

pub const SYSTEM: RangeInclusive<Opcode> = 1..=999;
pub const LOCATION: RangeInclusive<Opcode> = 1000..=1999;
pub const ACTOR: RangeInclusive<Opcode> = 2000..=2999;
pub const APPLICATION_START: Opcode = 10_000;

pub const OBJECT_ADD_REQUEST: Opcode = 1001;
pub const OBJECT_ADD_RESPONSE: Opcode = 1002;
pub const OBJECT_GET_REQUEST: Opcode = 1003;
pub const OBJECT_GET_RESPONSE: Opcode = 1004;
pub const OBJECT_LOCK_REQUEST: Opcode = 1005;
pub const OBJECT_LOCK_RESPONSE: Opcode = 1006;
pub const OBJECT_UNLOCK_REQUEST: Opcode = 1007;
pub const OBJECT_UNLOCK_RESPONSE: Opcode = 1008;
pub const OBJECT_REMOVE_REQUEST: Opcode = 1009;
pub const OBJECT_REMOVE_RESPONSE: Opcode = 1010;

pub const ACTOR_DELIVER_REQUEST: Opcode = 2001;
pub const ACTOR_DELIVER_RESPONSE: Opcode = 2002;

/// Human-readable owner of an opcode, for logs
pub fn range_name(opcode: Opcode) -> &'static str {
    if SYSTEM.contains(&opcode) {
        "system"
    } else if LOCATION.contains(&opcode) {
        "location"
    } else if ACTOR.contains(&opcode) {
        "actor"
    } else if opcode >= APPLICATION_START {
        "application"
    } else {
        "reserved"
    }
}
