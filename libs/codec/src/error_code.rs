//! Wire error codes
//!
//! Error codes are the only failure representation that crosses a session,
//! a fiber boundary or the network. `0` is success; everything else is
//! grouped by the layer that raises it:
//!
//! | Range             | Layer                       |
//! |-------------------|-----------------------------|
//! | 1..100_000        | application handlers        |
//! | 100_000..102_000  | transport (channel-fatal)   |
//! | 102_000..103_000  | session / rpc / dispatch    |
//! | 103_000..104_000  | coroutine lock              |
//! | 104_000..105_000  | location registry           |

pub const ERR_SUCCESS: i32 = 0;

// Transport: the channel that raised one of these is gone.
pub const ERR_CONNECT_FAILED: i32 = 100_001;
pub const ERR_CONNECT_TIMEOUT: i32 = 100_002;
pub const ERR_PEER_DISCONNECT: i32 = 100_003;
pub const ERR_SOCKET_SEND: i32 = 100_004;
pub const ERR_SOCKET_RECV: i32 = 100_005;
pub const ERR_FRAME_TOO_LARGE: i32 = 100_006;
pub const ERR_MALFORMED_FRAME: i32 = 100_007;
pub const ERR_PEER_TIMEOUT: i32 = 100_008;
pub const ERR_ACCEPT_TIMEOUT: i32 = 100_009;
pub const ERR_NOT_FOUND_CHANNEL: i32 = 100_010;
pub const ERR_SERVICE_DISPOSED: i32 = 100_011;
pub const ERR_CHANNEL_REMOVED: i32 = 100_012;

// Session and dispatch
pub const ERR_SESSION_DISPOSED: i32 = 102_001;
pub const ERR_RPC_TIMEOUT: i32 = 102_002;
pub const ERR_RPC_CANCELLED: i32 = 102_003;
pub const ERR_SESSION_IDLE_TIMEOUT: i32 = 102_004;
pub const ERR_PROTOCOL_VIOLATION: i32 = 102_005;
pub const ERR_HANDLER_NOT_FOUND: i32 = 102_006;
pub const ERR_HANDLER_FAILED: i32 = 102_007;
pub const ERR_PAYLOAD_DECODE: i32 = 102_008;
pub const ERR_NOT_FOUND_ACTOR: i32 = 102_009;
pub const ERR_PROCESS_UNKNOWN: i32 = 102_010;

// Coroutine lock
pub const ERR_LOCK_TIMEOUT: i32 = 103_001;
pub const ERR_LOCK_CANCELLED: i32 = 103_002;

// Location registry
pub const ERR_LOCATION_NOT_FOUND: i32 = 104_001;
pub const ERR_LOCATION_LOCKED: i32 = 104_002;
pub const ERR_LOCATION_OWNER_MISMATCH: i32 = 104_003;
pub const ERR_LOCATION_NOT_LOCKED: i32 = 104_004;

/// Whether the code means the underlying channel is unusable
pub fn is_transport_error(code: i32) -> bool {
    (100_000..102_000).contains(&code)
}

/// Whether the code is a cancel-kind outcome rather than a failure
pub fn is_cancellation(code: i32) -> bool {
    matches!(code, ERR_RPC_CANCELLED | ERR_LOCK_CANCELLED)
}

/// Short human-readable name for logs
pub fn describe(code: i32) -> &'static str {
    match code {
        ERR_SUCCESS => "success",
        ERR_CONNECT_FAILED => "connect failed",
        ERR_CONNECT_TIMEOUT => "connect timeout",
        ERR_PEER_DISCONNECT => "peer disconnected",
        ERR_SOCKET_SEND => "socket send failed",
        ERR_SOCKET_RECV => "socket receive failed",
        ERR_FRAME_TOO_LARGE => "frame too large",
        ERR_MALFORMED_FRAME => "malformed frame",
        ERR_PEER_TIMEOUT => "peer timeout",
        ERR_ACCEPT_TIMEOUT => "accept timeout",
        ERR_NOT_FOUND_CHANNEL => "channel not found",
        ERR_SERVICE_DISPOSED => "service disposed",
        ERR_CHANNEL_REMOVED => "channel removed",
        ERR_SESSION_DISPOSED => "session disposed",
        ERR_RPC_TIMEOUT => "rpc timeout",
        ERR_RPC_CANCELLED => "rpc cancelled",
        ERR_SESSION_IDLE_TIMEOUT => "session idle timeout",
        ERR_PROTOCOL_VIOLATION => "protocol violation",
        ERR_HANDLER_NOT_FOUND => "handler not found",
        ERR_HANDLER_FAILED => "handler failed",
        ERR_PAYLOAD_DECODE => "payload decode failed",
        ERR_NOT_FOUND_ACTOR => "actor not found",
        ERR_PROCESS_UNKNOWN => "process unknown",
        ERR_LOCK_TIMEOUT => "lock timeout",
        ERR_LOCK_CANCELLED => "lock cancelled",
        ERR_LOCATION_NOT_FOUND => "location not found",
        ERR_LOCATION_LOCKED => "location locked",
        ERR_LOCATION_OWNER_MISMATCH => "location owner mismatch",
        ERR_LOCATION_NOT_LOCKED => "location not locked",
        1..=99_999 => "application error",
        _ => "unknown error",
    }
}
