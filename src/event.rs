//! Progress events emitted while a headset procedure runs.
//!
//! The driver reports every step through an [`EventBus`]; the command
//! line prints them, tests record them.

use std::{sync::Arc, time::Duration};

use smol_str::SmolStr;

use crate::{
   bluetooth::{address::Address, parser::Discovered},
   headset::action::{Action, Outcome},
};

/// Events that can be emitted by the session driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
   StepStarted(Action),
   StepFinished(Action, Outcome),
   StepRetrying {
      action: Action,
      attempt: u32,
      delay: Duration,
      reason: SmolStr,
   },
   StepFailed(Action, SmolStr),
   PromptAnswered(Action, &'static str),
   DeviceSeen(Discovered),
   AlreadyConnected(Address),
   Escalating(Address),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: SessionEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

/// Prints progress to standard output.
pub struct Console {
   quiet: bool,
}

impl Console {
   pub const fn new(quiet: bool) -> Self {
      Self { quiet }
   }
}

impl EventBus for Console {
   fn emit(&self, event: SessionEvent) {
      if self.quiet {
         return;
      }
      match event {
         SessionEvent::StepStarted(action) => println!(":: {}", action.command()),
         SessionEvent::StepFinished(action, outcome) => println!("   {action}: {outcome}"),
         SessionEvent::StepRetrying {
            action,
            attempt,
            delay,
            reason,
         } => {
            println!(
               "   {action} failed ({reason}), retry {attempt} in {:.1}s",
               delay.as_secs_f32()
            );
         },
         SessionEvent::StepFailed(action, reason) => println!("   {action} failed: {reason}"),
         SessionEvent::PromptAnswered(action, answer) => {
            println!("   {action}: answered agent prompt with '{answer}'");
         },
         SessionEvent::DeviceSeen(device) => println!("   found {} {}", device.address, device.name),
         SessionEvent::AlreadyConnected(addr) => println!(":: {addr} is already connected"),
         SessionEvent::Escalating(addr) => {
            println!(":: connecting to {addr} failed, removing and pairing it again");
         },
      }
   }
}

#[cfg(test)]
pub mod recorder {
   use parking_lot::Mutex;

   use super::*;

   /// Collects emitted events for inspection.
   #[derive(Default)]
   pub struct Recorder {
      events: Mutex<Vec<SessionEvent>>,
   }

   impl Recorder {
      pub fn new() -> Arc<Self> {
         Arc::new(Self::default())
      }

      pub fn events(&self) -> Vec<SessionEvent> {
         self.events.lock().clone()
      }
   }

   impl EventBus for Recorder {
      fn emit(&self, event: SessionEvent) {
         self.events.lock().push(event);
      }
   }
}
