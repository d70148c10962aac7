//! Parsing of control shell replies.
//!
//! This module turns the text printed by the control shell for `info`,
//! `devices` and discovery events into typed values.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::Serialize;
use smol_str::SmolStr;

use crate::bluetooth::address::Address;

static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"(?m)(?:^|[#>] )Device ([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5}) ([^\n]+)$")
      .expect("device line pattern")
});

static NEW_DEVICE: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"\[NEW\] Device ([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5}) ([^\n]+)")
      .expect("discovery pattern")
});

static UNAVAILABLE: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"Device [0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5} not available")
      .expect("unavailable pattern")
});

/// A device listed by `devices` or announced while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discovered {
   pub address: Address,
   pub name: SmolStr,
}

/// State of a device as reported by `info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
   pub address: Address,
   pub name: Option<SmolStr>,
   pub alias: Option<SmolStr>,
   pub icon: Option<SmolStr>,
   pub paired: bool,
   pub bonded: bool,
   pub trusted: bool,
   pub blocked: bool,
   pub connected: bool,
   pub battery: Option<u8>,
   pub services: Vec<SmolStr>,
}

impl DeviceInfo {
   /// Best human-readable name for the device.
   pub fn display_name(&self) -> String {
      self
         .alias
         .as_ref()
         .or(self.name.as_ref())
         .map_or_else(|| self.address.to_string(), SmolStr::to_string)
   }
}

/// Parses the reply to `info <address>`.
pub fn parse_info(address: Address, text: &str) -> DeviceInfo {
   let mut info = DeviceInfo {
      address,
      ..DeviceInfo::default()
   };

   for line in text.lines() {
      let Some((key, value)) = line.trim().split_once(':') else {
         continue;
      };
      let value = value.trim();
      match key {
         "Name" => info.name = Some(value.into()),
         "Alias" => info.alias = Some(value.into()),
         "Icon" => info.icon = Some(value.into()),
         "Paired" => info.paired = is_yes(value),
         "Bonded" => info.bonded = is_yes(value),
         "Trusted" => info.trusted = is_yes(value),
         "Blocked" => info.blocked = is_yes(value),
         "Connected" => info.connected = is_yes(value),
         "Battery Percentage" => info.battery = parse_battery(value),
         "UUID" => {
            let service = value.split_once(" (").map_or(value, |(name, _)| name).trim();
            info.services.push(service.into());
         },
         _ => {},
      }
   }

   debug!(
      "Parsed info for {address}: paired={} trusted={} connected={}",
      info.paired, info.trusted, info.connected
   );
   info
}

/// Parses the reply to `devices`.
pub fn parse_devices(text: &str) -> Vec<Discovered> {
   DEVICE_LINE
      .captures_iter(text)
      .filter_map(|caps| {
         let address = caps[1].parse().ok()?;
         let name = caps[2].trim();
         (name != "not available").then(|| Discovered {
            address,
            name: name.into(),
         })
      })
      .collect()
}

/// Parses a `[NEW] Device` line printed while scanning.
pub fn parse_discovery(line: &str) -> Option<Discovered> {
   let caps = NEW_DEVICE.captures(line)?;
   Some(Discovered {
      address: caps[1].parse().ok()?,
      name: caps[2].trim().into(),
   })
}

/// Whether the shell reported that it does not know a device.
pub fn is_unavailable(text: &str) -> bool {
   UNAVAILABLE.is_match(text)
}

fn is_yes(value: &str) -> bool {
   value.eq_ignore_ascii_case("yes")
}

/// Parses `0x50 (80)`, falling back to the hexadecimal value.
fn parse_battery(value: &str) -> Option<u8> {
   if let Some((_, rest)) = value.split_once('(')
      && let Ok(level) = rest.trim_end_matches(')').trim().parse()
   {
      return Some(level);
   }
   let hex = value.split_whitespace().next()?.trim_start_matches("0x");
   u8::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
   use super::*;

   const INFO: &str = "Device 00:1B:66:0A:BC:EF (public)
\tName: MOMENTUM TW
\tAlias: Momentum
\tClass: 0x00240404
\tIcon: audio-headset
\tPaired: yes
\tBonded: yes
\tTrusted: yes
\tBlocked: no
\tConnected: no
\tLegacyPairing: no
\tUUID: Headset                   (00001108-0000-1000-8000-00805f9b34fb)
\tUUID: Audio Sink                (0000110b-0000-1000-8000-00805f9b34fb)
\tModalias: bluetooth:v0082p0100d0104
\tBattery Percentage: 0x50 (80)
";

   fn addr() -> Address {
      "00:1B:66:0A:BC:EF".parse().unwrap()
   }

   #[test]
   fn test_parse_info() {
      let info = parse_info(addr(), INFO);
      assert_eq!(info.name.as_deref(), Some("MOMENTUM TW"));
      assert_eq!(info.display_name(), "Momentum");
      assert_eq!(info.icon.as_deref(), Some("audio-headset"));
      assert!(info.paired && info.bonded && info.trusted);
      assert!(!info.blocked && !info.connected);
      assert_eq!(info.battery, Some(80));
      assert_eq!(info.services, vec![SmolStr::new("Headset"), SmolStr::new("Audio Sink")]);
   }

   #[test]
   fn test_parse_info_minimal() {
      let info = parse_info(addr(), "Device 00:1B:66:0A:BC:EF (public)\n\tConnected: yes\n");
      assert!(info.connected);
      assert!(!info.paired);
      assert_eq!(info.battery, None);
      assert_eq!(info.display_name(), "00:1B:66:0A:BC:EF");
   }

   #[test]
   fn test_parse_battery_variants() {
      assert_eq!(parse_battery("0x50 (80)"), Some(80));
      assert_eq!(parse_battery("0x64"), Some(100));
      assert_eq!(parse_battery("unknown"), None);
   }

   #[test]
   fn test_parse_devices() {
      let text = "[bluetooth]# Device 00:1B:66:0A:BC:EF MOMENTUM TW\n\
                  Device 11:22:33:44:55:66 WH-1000XM4\n\
                  [CHG] Device 11:22:33:44:55:66 RSSI: -60\n\
                  Device AA:BB:CC:DD:EE:FF not available\n";
      let devices = parse_devices(text);
      assert_eq!(
         devices,
         vec![
            Discovered {
               address: addr(),
               name: "MOMENTUM TW".into(),
            },
            Discovered {
               address: "11:22:33:44:55:66".parse().unwrap(),
               name: "WH-1000XM4".into(),
            },
         ]
      );
   }

   #[test]
   fn test_parse_discovery() {
      let found = parse_discovery("[NEW] Device 00:1B:66:0A:BC:EF MOMENTUM TW").unwrap();
      assert_eq!(found.address, addr());
      assert_eq!(found.name, "MOMENTUM TW");
      assert!(parse_discovery("[CHG] Device 00:1B:66:0A:BC:EF RSSI: -40").is_none());
   }

   #[test]
   fn test_is_unavailable() {
      assert!(is_unavailable("Device 00:1B:66:0A:BC:EF not available\n"));
      assert!(!is_unavailable(INFO));
   }
}
