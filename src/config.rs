//! Configuration management for `bl`.
//!
//! This module handles loading and saving configuration from disk,
//! including the known headsets and session timing parameters.

use std::{
   env, fmt, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::{
   bluetooth::address::Address,
   error::{BlError, Result},
   headset::driver::Timing,
};

/// Main configuration structure.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub default_device: Option<SmolStr>,

   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub controller: Option<Address>,

   #[serde(default = "default_shell_command")]
   pub shell_command: String,

   #[serde(default)]
   pub shell_args: Vec<String>,

   #[serde(default = "default_command_timeout")]
   pub command_timeout_sec: u64,

   #[serde(default = "default_connect_timeout")]
   pub connect_timeout_sec: u64,

   #[serde(default = "default_scan_timeout")]
   pub scan_timeout_sec: u64,

   #[serde(default = "default_retry_count")]
   pub retry_count: u32,

   #[serde(default = "default_retry_delay")]
   pub retry_delay_ms: u64,

   #[serde(default = "default_auto_fix")]
   pub auto_fix: bool,

   #[serde(default)]
   pub power_cycle: bool,

   #[serde(default)]
   pub known_devices: Vec<KnownDevice>,
}

/// A headset managed by `bl`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KnownDevice {
   pub alias: SmolStr,
   pub address: Address,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub name: Option<SmolStr>,
}

impl fmt::Display for KnownDevice {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match &self.name {
         Some(name) => write!(f, "{} ({name}, {})", self.alias, self.address),
         None => write!(f, "{} ({})", self.alias, self.address),
      }
   }
}

fn default_shell_command() -> String {
   "bluetoothctl".into()
}

const fn default_command_timeout() -> u64 {
   10
}

const fn default_connect_timeout() -> u64 {
   20
}

const fn default_scan_timeout() -> u64 {
   30
}

const fn default_retry_count() -> u32 {
   3
}

const fn default_retry_delay() -> u64 {
   1000
}

const fn default_auto_fix() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         default_device: None,
         controller: None,
         shell_command: default_shell_command(),
         shell_args: vec![],
         command_timeout_sec: default_command_timeout(),
         connect_timeout_sec: default_connect_timeout(),
         scan_timeout_sec: default_scan_timeout(),
         retry_count: default_retry_count(),
         retry_delay_ms: default_retry_delay(),
         auto_fix: default_auto_fix(),
         power_cycle: false,
         known_devices: vec![],
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save_to(&self, path: &Path) -> Result<()> {
      // Ensure directory exists
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   pub fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(bl_home) = env::var("BL_HOME") {
         PathBuf::from(bl_home)
      } else {
         dirs::config_dir()
            .ok_or(BlError::ConfigDirNotFound)?
            .join("bl")
      };

      Ok(config_dir.join("config.toml"))
   }

   pub const fn timing(&self) -> Timing {
      Timing {
         command_timeout: Duration::from_secs(self.command_timeout_sec),
         connect_timeout: Duration::from_secs(self.connect_timeout_sec),
         scan_timeout: Duration::from_secs(self.scan_timeout_sec),
         retry_count: self.retry_count,
         retry_delay: Duration::from_millis(self.retry_delay_ms),
      }
   }

   fn find_alias(&self, alias: &str) -> Option<&KnownDevice> {
      self
         .known_devices
         .iter()
         .find(|d| d.alias.eq_ignore_ascii_case(alias))
   }

   /// Picks the headset a command operates on.
   ///
   /// Without a query this is the default device, or the only known one.
   /// A query is matched against aliases, then names, then read as an
   /// address; addresses need not belong to a known device.
   pub fn resolve(&self, query: Option<&str>) -> Result<KnownDevice> {
      let Some(query) = query else {
         if let Some(default) = &self.default_device {
            return self
               .find_alias(default)
               .cloned()
               .ok_or_else(|| BlError::UnknownDevice(default.clone()));
         }
         return match self.known_devices.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(BlError::NoDefaultDevice),
         };
      };

      if let Some(device) = self.find_alias(query) {
         return Ok(device.clone());
      }
      if let Some(device) = self.known_devices.iter().find(|d| {
         d.name
            .as_ref()
            .is_some_and(|name| name.eq_ignore_ascii_case(query))
      }) {
         return Ok(device.clone());
      }

      let address: Address = query
         .parse()
         .map_err(|_| BlError::UnknownDevice(query.into()))?;
      Ok(self
         .known_devices
         .iter()
         .find(|d| d.address == address)
         .cloned()
         .unwrap_or_else(|| KnownDevice {
            alias: address.to_string().into(),
            address,
            name: None,
         }))
   }

   pub fn add_device(&mut self, alias: &str, address: Address, name: Option<&str>) -> Result<()> {
      if self.find_alias(alias).is_some() {
         return Err(BlError::DuplicateAlias(alias.into()));
      }
      self.known_devices.push(KnownDevice {
         alias: alias.into(),
         address,
         name: name.map(SmolStr::from),
      });
      Ok(())
   }

   /// Removes a headset, clearing the default if it pointed there.
   pub fn forget_device(&mut self, alias: &str) -> Result<KnownDevice> {
      let index = self
         .known_devices
         .iter()
         .position(|d| d.alias.eq_ignore_ascii_case(alias))
         .ok_or_else(|| BlError::UnknownDevice(alias.into()))?;
      let removed = self.known_devices.remove(index);

      if self
         .default_device
         .as_ref()
         .is_some_and(|d| d.eq_ignore_ascii_case(&removed.alias))
      {
         self.default_device = None;
      }
      Ok(removed)
   }

   pub fn set_default(&mut self, alias: &str) -> Result<()> {
      let device = self
         .find_alias(alias)
         .ok_or_else(|| BlError::UnknownDevice(alias.into()))?;
      self.default_device = Some(device.alias.clone());
      Ok(())
   }
}
