//! Error types for `bl`.
//!
//! This module defines all error types that can occur while driving the
//! Bluetooth control shell, including configuration, I/O, process and
//! session errors.

use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;

use crate::bluetooth::address::Address;

/// Main error type for `bl`.
#[derive(Error, Debug)]
pub enum BlError {
   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("Invalid Bluetooth address: {0}")]
   InvalidAddress(SmolStr),

   #[error("Unknown device: {0}")]
   UnknownDevice(SmolStr),

   #[error("No device given and no default device configured")]
   NoDefaultDevice,

   #[error("Alias already in use: {0}")]
   DuplicateAlias(SmolStr),

   #[error("Failed to start {program}: {source}")]
   ShellSpawn {
      program: SmolStr,
      source: std::io::Error,
   },

   #[error("Control shell exited unexpectedly")]
   ShellExited,

   #[error("Timed out after {after:?} waiting for {waiting_for}")]
   Timeout {
      waiting_for: SmolStr,
      after: Duration,
   },

   #[error("Step {step} failed: {reason}")]
   StepFailed { step: SmolStr, reason: SmolStr },

   #[error("Device {0} did not show up while scanning")]
   DeviceNotFound(Address),

   #[error("Device {0} not available")]
   DeviceUnavailable(Address),

   #[error("Controller {0} not available")]
   ControllerNotAvailable(Address),
}

impl BlError {
   /// Process exit status reported for this error.
   pub const fn exit_code(&self) -> u8 {
      match self {
         Self::ShellSpawn { .. } => 3,
         Self::TomlParse(_)
         | Self::TomlSerialize(_)
         | Self::ConfigDirNotFound
         | Self::InvalidAddress(_)
         | Self::UnknownDevice(_)
         | Self::NoDefaultDevice
         | Self::DuplicateAlias(_) => 2,
         _ => 1,
      }
   }

   /// Whether a failed step may be attempted again.
   pub const fn is_retryable(&self) -> bool {
      matches!(self, Self::Timeout { .. } | Self::StepFailed { .. })
   }
}

/// Convenience type alias for Results with `BlError`.
pub type Result<T> = std::result::Result<T, BlError>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_exit_codes() {
      assert_eq!(BlError::NoDefaultDevice.exit_code(), 2);
      assert_eq!(BlError::ShellExited.exit_code(), 1);
      assert_eq!(
         BlError::ShellSpawn {
            program: "bluetoothctl".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
         }
         .exit_code(),
         3
      );
   }

   #[test]
   fn test_retryable() {
      assert!(
         BlError::Timeout {
            waiting_for: "connect".into(),
            after: Duration::from_secs(1),
         }
         .is_retryable()
      );
      assert!(!BlError::ShellExited.is_retryable());
      assert!(!BlError::DeviceUnavailable(Address::ANY).is_retryable());
   }
}
