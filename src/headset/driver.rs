//! Session driver for headset procedures.
//!
//! The driver owns a control shell session and runs scripted
//! [`Action`]s against it: it sends each command, reacts to the reply
//! (answering agent prompts on the way), and retries failing steps with
//! exponential backoff. The headset procedures are compositions of those
//! steps.

use std::{collections::HashSet, sync::LazyLock, time::Duration};

use log::{debug, info, warn};
use rand::Rng;
use regex::Regex;
use smol_str::{SmolStr, ToSmolStr};
use tokio::time::{self, Instant};

use crate::{
   bluetooth::{
      address::Address,
      parser::{self, DeviceInfo, Discovered},
      shell::{self, Shell},
   },
   error::{BlError, Result},
   event::{EventSender, SessionEvent},
   headset::action::{Action, Outcome, Reaction, Reactions},
   transcript::Transcript,
};

/// Upper bound for the delay between two attempts of a step
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

static NEW_DEVICE_LINE: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"\[NEW\] Device [^\n]*\n").expect("new device pattern"));

/// Deadlines and retry policy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
   pub command_timeout: Duration,
   pub connect_timeout: Duration,
   pub scan_timeout: Duration,
   pub retry_count: u32,
   pub retry_delay: Duration,
}

impl Timing {
   const fn timeout_for(&self, action: Action) -> Duration {
      if action.is_slow() {
         self.connect_timeout
      } else {
         self.command_timeout
      }
   }
}

/// Result of [`Driver::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Ensured {
   #[strum(serialize = "already connected")]
   AlreadyConnected,
   #[strum(serialize = "connected")]
   Connected,
   #[strum(serialize = "fixed and connected")]
   Fixed,
}

/// Drives one control shell session.
pub struct Driver {
   shell: Shell,
   timing: Timing,
   events: EventSender,
   controller: Option<Address>,
}

impl Driver {
   pub fn new(shell: Shell, timing: Timing, events: EventSender) -> Self {
      Self {
         shell,
         timing,
         events,
         controller: None,
      }
   }

   /// Selects `controller` before any other step.
   pub fn with_controller(mut self, controller: Option<Address>) -> Self {
      self.controller = controller;
      self
   }

   pub fn transcript(&self) -> &Transcript {
      self.shell.transcript()
   }

   /// Ends the session.
   pub async fn close(&mut self) {
      self.shell.quit().await;
   }

   // === Steps ===

   /// Runs one action, retrying it until it succeeds or retries run out.
   pub async fn run(&mut self, action: Action) -> Result<Outcome> {
      let reactions = action.reactions();
      let mut attempt = 0;

      loop {
         self.events.emit(SessionEvent::StepStarted(action));

         let err = match self.attempt(action, &reactions).await {
            Ok((outcome, _)) if action.tolerates(outcome) => {
               debug!("{action} finished: {outcome}");
               self.events.emit(SessionEvent::StepFinished(action, outcome));
               return Ok(outcome);
            },
            Ok((Outcome::Unavailable, reply)) => {
               let err = action
                  .address()
                  .map_or_else(|| step_failed(action, &reply), BlError::DeviceUnavailable);
               self
                  .events
                  .emit(SessionEvent::StepFailed(action, err.to_smolstr()));
               return Err(err);
            },
            Ok((_, reply)) => step_failed(action, &reply),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
         };

         if attempt >= self.timing.retry_count {
            warn!("{action} failed after {} attempts: {err}", attempt + 1);
            self
               .events
               .emit(SessionEvent::StepFailed(action, err.to_smolstr()));
            return Err(err);
         }

         attempt += 1;
         let delay = calc_retry_delay(self.timing.retry_delay, attempt);
         info!("{action} failed ({err}), retrying in {delay:?}");
         self.events.emit(SessionEvent::StepRetrying {
            action,
            attempt,
            delay,
            reason: err.to_smolstr(),
         });
         time::sleep(delay).await;
      }
   }

   async fn attempt(&mut self, action: Action, reactions: &Reactions) -> Result<(Outcome, String)> {
      let timeout = self.timing.timeout_for(action);
      let deadline = shell::deadline_after(timeout);

      self.shell.discard_pending();
      self.shell.send_line(&action.command()).await?;

      loop {
         let remaining = deadline.saturating_duration_since(Instant::now());
         let found = self
            .shell
            .expect(reactions.patterns(), remaining)
            .await
            .map_err(|e| match e {
               BlError::Timeout { .. } => BlError::Timeout {
                  waiting_for: action.command().into(),
                  after: timeout,
               },
               e => e,
            })?;

         match reactions.reaction(found.index) {
            Some(Reaction::Finish(outcome)) => return Ok((outcome, found.text)),
            Some(Reaction::Reply(answer)) => {
               debug!("Answering agent prompt {:?} with {answer}", found.text);
               self
                  .events
                  .emit(SessionEvent::PromptAnswered(action, answer));
               self.shell.send_line(answer).await?;
            },
            None => return Err(step_failed(action, &found.text)),
         }
      }
   }

   /// Makes `controller` the default controller of the session.
   pub async fn select_controller(&mut self, controller: Address) -> Result<()> {
      let reply = self
         .shell
         .fenced(&format!("select {controller}"), self.timing.command_timeout)
         .await?;
      if reply.contains("not available") {
         return Err(BlError::ControllerNotAvailable(controller));
      }
      debug!("Selected controller {controller}");
      Ok(())
   }

   /// Queries the Bluetooth stack's view of a device.
   pub async fn info(&mut self, addr: Address) -> Result<DeviceInfo> {
      let reply = self
         .shell
         .fenced(&format!("info {addr}"), self.timing.command_timeout)
         .await?;
      if parser::is_unavailable(&reply) {
         return Err(BlError::DeviceUnavailable(addr));
      }
      Ok(parser::parse_info(addr, &reply))
   }

   /// Lists the devices the Bluetooth stack knows about.
   pub async fn devices(&mut self) -> Result<Vec<Discovered>> {
      self.select_configured_controller().await?;
      let reply = self
         .shell
         .fenced("devices", self.timing.command_timeout)
         .await?;
      Ok(parser::parse_devices(&reply))
   }

   /// Waits for a running scan to report `addr`.
   async fn wait_for_device(&mut self, addr: Address) -> Result<()> {
      let seen = Regex::new(&format!(r"\[(?:NEW|CHG)\] Device {}", addr.pattern()))
         .expect("device seen pattern");
      match self
         .shell
         .expect(std::slice::from_ref(&seen), self.timing.scan_timeout)
         .await
      {
         Ok(_) => {
            info!("{addr} is visible");
            Ok(())
         },
         Err(BlError::Timeout { .. }) => Err(BlError::DeviceNotFound(addr)),
         Err(e) => Err(e),
      }
   }

   // === Procedures ===

   async fn select_configured_controller(&mut self) -> Result<()> {
      if let Some(controller) = self.controller {
         self.select_controller(controller).await?;
      }
      Ok(())
   }

   /// Powers the controller on and registers the pairing agent.
   pub async fn prepare(&mut self) -> Result<()> {
      self.select_configured_controller().await?;
      self.run(Action::PowerOn).await?;
      self.run(Action::Agent).await?;
      self.run(Action::DefaultAgent).await?;
      Ok(())
   }

   pub async fn connect(&mut self, addr: Address) -> Result<()> {
      self.prepare().await?;
      self.run(Action::Connect(addr)).await?;
      Ok(())
   }

   pub async fn disconnect(&mut self, addr: Address) -> Result<()> {
      self.prepare().await?;
      self.run(Action::Disconnect(addr)).await?;
      Ok(())
   }

   /// Forgets the device and pairs it again from scratch.
   pub async fn fix(&mut self, addr: Address, power_cycle: bool) -> Result<()> {
      self.prepare().await?;
      self.repair(addr, power_cycle).await
   }

   async fn repair(&mut self, addr: Address, power_cycle: bool) -> Result<()> {
      if power_cycle {
         self.run(Action::PowerOff).await?;
         self.run(Action::PowerOn).await?;
      }

      self.run(Action::Disconnect(addr)).await?;
      self.run(Action::Remove(addr)).await?;

      self.run(Action::ScanOn).await?;
      let found = self.wait_for_device(addr).await;
      let stopped = self.run(Action::ScanOff).await;
      found?;
      stopped?;

      self.run(Action::Pair(addr)).await?;
      self.run(Action::Trust(addr)).await?;
      self.run(Action::Connect(addr)).await?;
      info!("{addr} repaired");
      Ok(())
   }

   /// Makes sure the device is connected, repairing it when connecting
   /// fails and `auto_fix` is set.
   pub async fn ensure(&mut self, addr: Address, auto_fix: bool, power_cycle: bool) -> Result<Ensured> {
      self.prepare().await?;

      match self.info(addr).await {
         Ok(info) if info.connected => {
            self.events.emit(SessionEvent::AlreadyConnected(addr));
            return Ok(Ensured::AlreadyConnected);
         },
         Ok(_) => {},
         Err(BlError::DeviceUnavailable(_)) if auto_fix => {
            // Unknown to the stack: nothing to connect to yet.
            self.events.emit(SessionEvent::Escalating(addr));
            self.repair(addr, power_cycle).await?;
            return Ok(Ensured::Fixed);
         },
         Err(e) => return Err(e),
      }

      match self.run(Action::Connect(addr)).await {
         Ok(_) => Ok(Ensured::Connected),
         Err(
            e @ (BlError::StepFailed { .. }
            | BlError::Timeout { .. }
            | BlError::DeviceUnavailable(_)),
         ) if auto_fix => {
            warn!("Connecting to {addr} failed ({e}), repairing");
            self.events.emit(SessionEvent::Escalating(addr));
            self.repair(addr, power_cycle).await?;
            Ok(Ensured::Fixed)
         },
         Err(e) => Err(e),
      }
   }

   pub async fn status(&mut self, addr: Address) -> Result<DeviceInfo> {
      self.select_configured_controller().await?;
      self.info(addr).await
   }

   /// Scans for `duration` and returns the devices that appeared.
   pub async fn scan(&mut self, duration: Duration) -> Result<Vec<Discovered>> {
      self.select_configured_controller().await?;
      self.run(Action::PowerOn).await?;
      self.run(Action::ScanOn).await?;

      let deadline = shell::deadline_after(duration);
      let mut seen = HashSet::new();
      let mut found = Vec::new();
      loop {
         let remaining = deadline.saturating_duration_since(Instant::now());
         let line = match self
            .shell
            .expect(std::slice::from_ref(&*NEW_DEVICE_LINE), remaining)
            .await
         {
            Ok(m) => m.text,
            Err(BlError::Timeout { .. }) => break,
            Err(e) => return Err(e),
         };
         if let Some(device) = parser::parse_discovery(&line)
            && seen.insert(device.address)
         {
            self.events.emit(SessionEvent::DeviceSeen(device.clone()));
            found.push(device);
         }
      }

      self.run(Action::ScanOff).await?;
      Ok(found)
   }
}

fn step_failed(action: Action, reply: &str) -> BlError {
   BlError::StepFailed {
      step: action.to_smolstr(),
      reason: SmolStr::new(reply.trim()),
   }
}

fn calc_retry_delay(base_delay: Duration, retry_count: u32) -> Duration {
   let exponential = base_delay.saturating_mul(1 << retry_count.min(4));
   let delay = exponential.min(MAX_RETRY_DELAY);
   let jitter_ms = (base_delay.min(MAX_RETRY_DELAY).as_millis() / 2) as u64;
   if jitter_ms == 0 {
      return delay;
   }
   delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}
