//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manage Bluetooth headsets and quickly fix them when they do not connect
#[derive(Parser, Debug)]
#[command(name = "bl", version)]
pub struct Cli {
   #[command(subcommand)]
   pub command: Option<Commands>,

   /// Configuration file to use
   #[arg(short, long, global = true)]
   pub config: Option<PathBuf>,

   /// Seconds to wait for a reply to each command
   #[arg(short, long, global = true)]
   pub timeout: Option<u64>,

   /// Retries of a failing step
   #[arg(short, long, global = true)]
   pub retries: Option<u32>,

   /// Do not print progress
   #[arg(short, long, global = true)]
   pub quiet: bool,

   /// Enable debug logging
   #[arg(short, long, global = true)]
   pub verbose: bool,
}

/// Available commands. Without one, `ensure` runs on the default headset.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
   /// Connect, removing and pairing the headset again if that fails
   Ensure { device: Option<String> },

   /// Power on and connect
   Connect { device: Option<String> },

   /// Disconnect
   Disconnect { device: Option<String> },

   /// Remove, rediscover, pair, trust and connect
   Fix {
      device: Option<String>,

      /// Toggle controller power first
      #[arg(long)]
      power_cycle: bool,
   },

   /// Show pairing, connection and battery state
   Status {
      device: Option<String>,

      /// Print JSON
      #[arg(long)]
      json: bool,
   },

   /// List discoverable devices
   Scan {
      #[arg(short, long, default_value = "10")]
      seconds: u64,
   },

   /// List devices known to the Bluetooth stack
   Devices,

   /// List configured headsets
   List,

   /// Add a headset to the configuration
   Add {
      alias: String,
      address: String,

      #[arg(long)]
      name: Option<String>,

      /// Make it the default headset
      #[arg(long)]
      default: bool,
   },

   /// Remove a headset from the configuration
   Forget { alias: String },

   /// Set the default headset
   Default { alias: String },

   /// Print the transcript of the last session
   Transcript,

   /// Print the configuration file path
   ConfigPath,
}
