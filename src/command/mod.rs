//! Command server for inbound unlock requests
//!
//! This module handles:
//! - Accepting one request per TCP connection
//! - Authenticating the pre-shared secret in constant time
//! - Resolving and clamping the requested unlock duration
//! - Forwarding authenticated requests to the unlock scheduler

mod auth;
mod request;
mod server;

pub use auth::SharedSecret;
pub use request::{CommandHandler, DropReason, UnlockRequest, Verdict};
pub use server::{serve_connection, CommandServer, DEFAULT_MAX_CONNECTIONS, DEFAULT_READ_TIMEOUT};
