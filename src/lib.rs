//! Firmware for a network-attached door actuator
//!
//! Authenticated unlock requests arrive over TCP, each asking for the door to
//! be held open for a bounded number of seconds. Overlapping requests extend
//! the open window to the latest deadline and never shorten it.

pub mod actuator;
pub mod command;
pub mod config;
pub mod hub;
pub mod link;
pub mod scheduler;
