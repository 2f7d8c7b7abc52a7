//! Hub Module
//!
//! Client side of the coordinating hub: device registration, error reports
//! and relayed actions.

mod client;
mod registration;

pub use client::{HubClient, HubNotifier};
pub use registration::spawn_registration;
