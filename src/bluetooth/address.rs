//! Bluetooth device addresses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::BlError;

/// A 48-bit Bluetooth device address, displayed as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
   /// The all-zero address.
   pub const ANY: Self = Self([0; 6]);

   /// Regex fragment matching this address in control shell output.
   pub fn pattern(&self) -> String {
      // Upper-case hex and colons contain no regex metacharacters.
      format!("(?i:{self})")
   }
}

impl Default for Address {
   fn default() -> Self {
      Self::ANY
   }
}

impl fmt::Display for Address {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let [a, b, c, d, e, g] = self.0;
      write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
   }
}

impl FromStr for Address {
   type Err = BlError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      let invalid = || BlError::InvalidAddress(s.into());
      let mut bytes = [0u8; 6];
      let mut parts = s.trim().split([':', '-']);
      for byte in &mut bytes {
         let part = parts.next().ok_or_else(invalid)?;
         if part.len() != 2 {
            return Err(invalid());
         }
         *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
      }
      if parts.next().is_some() {
         return Err(invalid());
      }
      Ok(Self(bytes))
   }
}

impl Serialize for Address {
   fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.collect_str(self)
   }
}

impl<'de> Deserialize<'de> for Address {
   fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
      let s = String::deserialize(deserializer)?;
      s.parse().map_err(de::Error::custom)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_parse_and_display() {
      let addr: Address = "00:1b:66:0a:BC:ef".parse().unwrap();
      assert_eq!(addr.0, [0x00, 0x1B, 0x66, 0x0A, 0xBC, 0xEF]);
      assert_eq!(addr.to_string(), "00:1B:66:0A:BC:EF");

      let dashed: Address = "00-1B-66-0A-BC-EF".parse().unwrap();
      assert_eq!(dashed, addr);
   }

   #[test]
   fn test_parse_rejects_garbage() {
      for bad in [
         "",
         "00:1B:66:0A:BC",
         "00:1B:66:0A:BC:EF:01",
         "001B:66:0A:BC:EF",
         "GG:1B:66:0A:BC:EF",
         "headphones",
      ] {
         assert!(
            matches!(bad.parse::<Address>(), Err(BlError::InvalidAddress(_))),
            "accepted {bad:?}"
         );
      }
   }

   #[test]
   fn test_pattern_is_case_insensitive() {
      let addr: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
      let re = regex::Regex::new(&addr.pattern()).unwrap();
      assert!(re.is_match("[NEW] Device aa:bb:cc:dd:ee:ff Headset"));
   }

   #[test]
   fn test_serde_as_string() {
      #[derive(Serialize, Deserialize)]
      struct Wrapper {
         address: Address,
      }

      let parsed: Wrapper = toml::from_str(r#"address = "AA:BB:CC:DD:EE:FF""#).unwrap();
      assert_eq!(parsed.address.to_string(), "AA:BB:CC:DD:EE:FF");
      assert!(toml::from_str::<Wrapper>(r#"address = "nope""#).is_err());

      let json = serde_json::to_string(&parsed).unwrap();
      assert_eq!(json, r#"{"address":"AA:BB:CC:DD:EE:FF"}"#);
   }
}
