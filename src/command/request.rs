//! Unlock request extraction and authentication

use super::auth::SharedSecret;
use door_shared::{CodecError, FormParams, RawRequest, RequestDecoder, UnlockDuration};
use std::fmt;

/// What to do with an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Authenticated: hold the door open for this long
    Unlock(UnlockDuration),
    /// Not acted on
    Dropped(DropReason),
}

/// Why a request was not acted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The connection failed or stalled before a request was framed
    Unreadable(String),
    /// The bytes did not form a request with parameters
    Malformed(CodecError),
    /// Missing or wrong `psk`
    Unauthenticated,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Unreadable(reason) => write!(f, "unreadable: {}", reason),
            DropReason::Malformed(e) => write!(f, "malformed: {}", e),
            DropReason::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Fields of an unlock request as they arrived
#[derive(Clone, PartialEq, Eq)]
pub struct UnlockRequest {
    pub secret: String,
    pub requested_duration: Option<String>,
}

impl UnlockRequest {
    /// Pull the request fields out of a decoded form.
    ///
    /// A top-level `duration` wins; otherwise a `duration` nested inside
    /// `params` (requests relayed by a hub) is used.
    pub fn from_form(form: &FormParams) -> Self {
        let secret = form.get("psk").unwrap_or_default().to_string();
        let requested_duration = form.get("duration").map(str::to_string).or_else(|| {
            form.nested("params")
                .and_then(|params| params.get("duration").map(str::to_string))
        });

        Self {
            secret,
            requested_duration,
        }
    }

    /// The clamped unlock window this request asks for
    pub fn resolve(&self, default: UnlockDuration) -> UnlockDuration {
        UnlockDuration::from_field(self.requested_duration.as_deref(), default)
    }
}

impl fmt::Debug for UnlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockRequest")
            .field("secret", &"<redacted>")
            .field("requested_duration", &self.requested_duration)
            .finish()
    }
}

/// Authenticates requests and resolves their duration
#[derive(Debug, Clone)]
pub struct CommandHandler {
    secret: SharedSecret,
    default_duration: UnlockDuration,
}

impl CommandHandler {
    pub fn new(secret: SharedSecret, default_duration: UnlockDuration) -> Self {
        Self {
            secret,
            default_duration,
        }
    }

    /// Decide what a framed request asks for
    pub fn handle(&self, request: &RawRequest) -> Verdict {
        let form = match request.form() {
            Ok(form) => form,
            Err(e) => {
                // Same comparison work as an authenticated request
                let _ = self.secret.verify("");
                return Verdict::Dropped(DropReason::Malformed(e));
            }
        };

        let request = UnlockRequest::from_form(&form);
        if !self.secret.verify(&request.secret) {
            return Verdict::Dropped(DropReason::Unauthenticated);
        }

        Verdict::Unlock(request.resolve(self.default_duration))
    }

    /// Decide what a complete raw request buffer asks for
    pub fn handle_bytes(&self, raw: &[u8]) -> Verdict {
        let mut decoder = RequestDecoder::new();
        decoder.extend(raw);
        match decoder.finish() {
            Ok(request) => self.handle(&request),
            Err(e) => {
                let _ = self.secret.verify("");
                Verdict::Dropped(DropReason::Malformed(e))
            }
        }
    }
}
