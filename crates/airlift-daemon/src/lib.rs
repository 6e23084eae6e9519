//! # airlift-daemon
//!
//! Process wiring for airlift: configuration, logging, the Bluetooth event
//! loop and the HTTP API.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod testing;
