//! `bl`: Bluetooth headset fixer
//!
//! Drives the system Bluetooth control shell through scripted command
//! sequences to connect, disconnect, inspect and re-pair headsets.

use std::{fs, path::Path, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use log::{error, info, warn};

use bluetooth::{address::Address, parser::DeviceInfo, shell::Shell};
use cli::{Cli, Commands};
use config::{Config, KnownDevice};
use event::{Console, EventSender};
use headset::driver::Driver;

mod bluetooth;
mod cli;
mod config;
mod error;
mod event;
mod headset;
mod transcript;

use crate::error::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
   let cli = Cli::parse();

   let level = if cli.verbose { "debug" } else { "warn" };
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

   match run(cli).await {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => {
         error!("{e}");
         ExitCode::from(e.exit_code())
      },
   }
}

async fn run(cli: Cli) -> Result<()> {
   let config_path = match &cli.config {
      Some(path) => path.clone(),
      None => Config::config_path()?,
   };
   let mut config = Config::load_from(&config_path)?;
   info!(
      "Loaded configuration with {} known devices",
      config.known_devices.len()
   );

   if let Some(timeout) = cli.timeout {
      config.command_timeout_sec = timeout;
   }
   if let Some(retries) = cli.retries {
      config.retry_count = retries;
   }

   let command = cli.command.unwrap_or(Commands::Ensure { device: None });
   if let Some(session) = Session::plan(&config, &command)? {
      return run_session(&config, session, cli.quiet).await;
   }

   match command {
      Commands::List => {
         if config.known_devices.is_empty() {
            println!("No headsets configured, add one with `bl add ALIAS ADDRESS`");
         }
         for device in &config.known_devices {
            let marker = if config.default_device.as_ref() == Some(&device.alias) {
               "*"
            } else {
               " "
            };
            println!("{marker} {device}");
         }
      },
      Commands::Add {
         alias,
         address,
         name,
         default,
      } => {
         let address: Address = address.parse()?;
         config.add_device(&alias, address, name.as_deref())?;
         if default {
            config.set_default(&alias)?;
         }
         config.save_to(&config_path)?;
         println!("Added {alias} ({address})");
      },
      Commands::Forget { alias } => {
         let removed = config.forget_device(&alias)?;
         config.save_to(&config_path)?;
         println!("Forgot {removed}");
      },
      Commands::Default { alias } => {
         config.set_default(&alias)?;
         config.save_to(&config_path)?;
         println!("Default headset is now {alias}");
      },
      Commands::Transcript => print_transcript(&transcript::transcript_path()?)?,
      Commands::ConfigPath => println!("{}", config_path.display()),
      _ => unreachable!("session commands are planned above"),
   }

   Ok(())
}

/// A command that runs in a control shell session, with its target
/// resolved up front.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Session {
   Ensure(KnownDevice),
   Connect(KnownDevice),
   Disconnect(KnownDevice),
   Fix { target: KnownDevice, power_cycle: bool },
   Status { target: KnownDevice, json: bool },
   Scan(Duration),
   Devices,
}

impl Session {
   /// Returns `None` for commands that only touch the configuration.
   fn plan(config: &Config, command: &Commands) -> Result<Option<Self>> {
      let resolve = |device: &Option<String>| config.resolve(device.as_deref());
      let session = match command {
         Commands::Ensure { device } => Self::Ensure(resolve(device)?),
         Commands::Connect { device } => Self::Connect(resolve(device)?),
         Commands::Disconnect { device } => Self::Disconnect(resolve(device)?),
         Commands::Fix {
            device,
            power_cycle,
         } => Self::Fix {
            target: resolve(device)?,
            power_cycle: *power_cycle || config.power_cycle,
         },
         Commands::Status { device, json } => Self::Status {
            target: resolve(device)?,
            json: *json,
         },
         Commands::Scan { seconds } => Self::Scan(Duration::from_secs(*seconds)),
         Commands::Devices => Self::Devices,
         _ => return Ok(None),
      };
      Ok(Some(session))
   }
}

async fn run_session(config: &Config, session: Session, quiet: bool) -> Result<()> {
   let shell = Shell::spawn(&config.shell_command, &config.shell_args)?;
   let events: EventSender = Arc::new(Console::new(quiet));
   let mut driver = Driver::new(shell, config.timing(), events).with_controller(config.controller);

   let result = dispatch(&mut driver, config, session).await;
   driver.close().await;

   match transcript::transcript_path() {
      Ok(path) => save_transcript(&driver, &path),
      Err(e) => warn!("Could not locate transcript file: {e}"),
   }

   result
}

fn save_transcript(driver: &Driver, path: &Path) {
   if let Err(e) = driver.transcript().save(path) {
      warn!("Could not save session transcript to {}: {e}", path.display());
   }
}

async fn dispatch(driver: &mut Driver, config: &Config, session: Session) -> Result<()> {
   match session {
      Session::Ensure(target) => {
         let ensured = driver
            .ensure(target.address, config.auto_fix, config.power_cycle)
            .await?;
         println!("{}: {ensured}", target.alias);
      },
      Session::Connect(target) => {
         driver.connect(target.address).await?;
         println!("{}: connected", target.alias);
      },
      Session::Disconnect(target) => {
         driver.disconnect(target.address).await?;
         println!("{}: disconnected", target.alias);
      },
      Session::Fix {
         target,
         power_cycle,
      } => {
         driver.fix(target.address, power_cycle).await?;
         println!("{}: fixed and connected", target.alias);
      },
      Session::Status { target, json } => {
         let info = driver.status(target.address).await?;
         if json {
            println!("{}", serde_json::to_string_pretty(&info)?);
         } else {
            print_status(&info);
         }
      },
      Session::Scan(duration) => {
         let found = driver.scan(duration).await?;
         if found.is_empty() {
            println!("No devices found");
         }
         for device in found {
            println!("{} {}", device.address, device.name);
         }
      },
      Session::Devices => {
         for device in driver.devices().await? {
            println!("{} {}", device.address, device.name);
         }
      },
   }
   Ok(())
}

fn print_transcript(path: &Path) -> Result<()> {
   if !path.exists() {
      println!("No session recorded yet");
      return Ok(());
   }
   print!("{}", fs::read_to_string(path)?);
   Ok(())
}

fn print_status(info: &DeviceInfo) {
   let yes_no = |b: bool| if b { "yes" } else { "no" };
   println!("{} ({})", info.display_name(), info.address);
   println!("  paired:    {}", yes_no(info.paired));
   println!("  trusted:   {}", yes_no(info.trusted));
   println!("  blocked:   {}", yes_no(info.blocked));
   println!("  connected: {}", yes_no(info.connected));
   if let Some(battery) = info.battery {
      println!("  battery:   {battery}%");
   }
   if !info.services.is_empty() {
      println!("  services:  {}", info.services.join(", "));
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::error::BlError;

   /// Writes a configuration whose control shell cannot be started.
   fn broken_shell_config(dir: &Path, devices: &[(&str, &str)]) -> std::path::PathBuf {
      let path = dir.join("config.toml");
      let mut config = Config {
         shell_command: "/nonexistent/bluetoothctl".into(),
         ..Config::default()
      };
      for (alias, address) in devices {
         config
            .add_device(alias, address.parse().unwrap(), None)
            .unwrap();
      }
      config.save_to(&path).unwrap();
      path
   }

   fn cli(config: &Path, args: &[&str]) -> Cli {
      let config = config.to_str().unwrap();
      let mut argv = vec!["bl", "-c", config];
      argv.extend_from_slice(args);
      Cli::try_parse_from(argv).unwrap()
   }

   #[tokio::test]
   async fn test_missing_default_reported_before_shell_starts() {
      let dir = tempfile::tempdir().unwrap();
      let path = broken_shell_config(dir.path(), &[]);

      let err = run(cli(&path, &[])).await.unwrap_err();
      assert!(matches!(err, BlError::NoDefaultDevice), "got {err:?}");
      assert_eq!(err.exit_code(), 2);
   }

   #[tokio::test]
   async fn test_unknown_device_reported_before_shell_starts() {
      let dir = tempfile::tempdir().unwrap();
      let path = broken_shell_config(dir.path(), &[("bose", "00:1B:66:0A:BC:EF")]);

      let err = run(cli(&path, &["fix", "airpods"])).await.unwrap_err();
      assert!(matches!(err, BlError::UnknownDevice(_)), "got {err:?}");
      assert_eq!(err.exit_code(), 2);
   }

   #[tokio::test]
   async fn test_resolved_device_needs_the_shell() {
      let dir = tempfile::tempdir().unwrap();
      let path = broken_shell_config(dir.path(), &[("bose", "00:1B:66:0A:BC:EF")]);

      let err = run(cli(&path, &["connect"])).await.unwrap_err();
      assert!(matches!(err, BlError::ShellSpawn { .. }), "got {err:?}");
      assert_eq!(err.exit_code(), 3);
   }

   #[test]
   fn test_plan() {
      let mut config = Config::default();
      config
         .add_device("bose", "00:1B:66:0A:BC:EF".parse().unwrap(), None)
         .unwrap();
      config.power_cycle = true;

      let fix = Commands::Fix {
         device: None,
         power_cycle: false,
      };
      let Some(Session::Fix {
         target,
         power_cycle,
      }) = Session::plan(&config, &fix).unwrap()
      else {
         panic!("expected a fix session");
      };
      assert_eq!(target.alias, "bose");
      assert!(power_cycle);

      assert_eq!(
         Session::plan(&config, &Commands::Scan { seconds: 5 }).unwrap(),
         Some(Session::Scan(Duration::from_secs(5)))
      );
      assert_eq!(Session::plan(&config, &Commands::List).unwrap(), None);
   }

   #[test]
   fn test_transcript_before_first_session() {
      let dir = tempfile::tempdir().unwrap();
      print_transcript(&dir.path().join("last-session.log")).unwrap();

      let path = dir.path().join("saved.log");
      fs::write(&path, "> power on\n").unwrap();
      print_transcript(&path).unwrap();
   }
}
