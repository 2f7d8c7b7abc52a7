//! Door Actuator Shared Protocol Types
//!
//! This crate provides the request codec, the form-body grammar and the lock
//! state machine used by the door actuator firmware. It has no async runtime
//! dependency so everything here can be tested with plain `std` time.

pub mod codec;
pub mod state_machine;

use std::fmt;
use std::num::IntErrorKind;
use std::time::Duration;

pub use codec::{encode_form, parse_form, CodecError, FormParams, RawRequest, RequestDecoder};
pub use state_machine::{ExtendOutcome, LockState, RecheckOutcome};

/// Protocol parameters for the system
pub mod protocol {
    /// TCP port the command server listens on
    pub const COMMAND_PORT: u16 = 8080;

    /// Shortest unlock window a request can ask for
    pub const MIN_UNLOCK_SECS: i64 = 1;

    /// Longest unlock window a request can ask for
    pub const MAX_UNLOCK_SECS: i64 = 30;

    /// Unlock window used when a request carries no usable duration
    pub const DEFAULT_UNLOCK_SECS: i64 = 10;

    /// Upper bound for a whole request (headers and body)
    pub const MAX_REQUEST_BYTES: usize = 1024;

    /// Interval between link status polls while joining
    pub const LINK_POLL_INTERVAL_MS: u64 = 500;

    /// How long a single join attempt may take before it is aborted
    pub const LINK_CONNECT_TIMEOUT_MS: u64 = 60_000;

    /// The only response the command server ever sends
    pub const ACK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
}

/// An unlock window, always within `[MIN_UNLOCK_SECS, MAX_UNLOCK_SECS]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnlockDuration(u8);

impl UnlockDuration {
    /// Clamp a requested number of seconds into the allowed window
    pub fn clamped(secs: i64) -> Self {
        let secs = secs.clamp(protocol::MIN_UNLOCK_SECS, protocol::MAX_UNLOCK_SECS);
        Self(secs as u8)
    }

    /// Resolve a raw `duration` field.
    ///
    /// Integers are clamped (including ones too large for `i64`). Anything
    /// absent, empty or non-numeric falls back to `default`.
    pub fn from_field(value: Option<&str>, default: UnlockDuration) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return default;
        };

        match raw.parse::<i64>() {
            Ok(secs) => Self::clamped(secs),
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => Self::clamped(protocol::MAX_UNLOCK_SECS),
                IntErrorKind::NegOverflow => Self::clamped(protocol::MIN_UNLOCK_SECS),
                _ => default,
            },
        }
    }

    /// Length of the window in whole seconds
    pub fn secs(self) -> u64 {
        u64::from(self.0)
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.secs())
    }
}

impl Default for UnlockDuration {
    fn default() -> Self {
        Self::clamped(protocol::DEFAULT_UNLOCK_SECS)
    }
}

impl fmt::Display for UnlockDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
