//! Bluetooth control shell layer.
//!
//! This module provides the transport to the system's interactive
//! Bluetooth control shell, parsing of its replies, and device addresses.

pub mod address;
#[cfg(test)]
pub mod fake;
pub mod parser;
pub mod shell;
