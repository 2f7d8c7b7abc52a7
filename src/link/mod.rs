//! Network link management
//!
//! This module handles:
//! - Joining the wireless network with a bounded per-attempt timeout
//! - Blocking startup until the link is up
//! - Re-joining in the background after the link drops

mod nmcli;
mod supervisor;
mod traits;

pub use nmcli::{NmcliLink, StaticLink};
pub use supervisor::{connect, connect_until_up, stay_connected, LinkConfig};
pub use traits::NetworkLink;
