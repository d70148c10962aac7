//! Headset procedures.
//!
//! This module contains the scripted steps and the session driver that
//! composes them into connect, disconnect, fix and status procedures.

pub mod action;
pub mod driver;
