//! Scripted control shell steps.
//!
//! Every [`Action`] knows the command line it sends and how to read the
//! shell's reply: a table of patterns, each either finishing the step with
//! an [`Outcome`] or answering an interactive agent prompt.

use regex::Regex;

use crate::bluetooth::address::Address;

/// A single step of a headset procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
   PowerOn,
   PowerOff,
   Agent,
   DefaultAgent,
   Disconnect(Address),
   Remove(Address),
   ScanOn,
   ScanOff,
   Pair(Address),
   Trust(Address),
   Connect(Address),
}

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Outcome {
   #[strum(serialize = "done")]
   Done,
   #[strum(serialize = "already done")]
   AlreadyDone,
   #[strum(serialize = "not available")]
   Unavailable,
   #[strum(serialize = "failed")]
   Failed,
}

/// What to do when a pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
   Finish(Outcome),
   Reply(&'static str),
}

/// Patterns an action waits for, with their reactions.
#[derive(Debug, Clone)]
pub struct Reactions {
   patterns: Vec<Regex>,
   reactions: Vec<Reaction>,
}

impl Reactions {
   fn new() -> Self {
      Self {
         patterns: Vec::new(),
         reactions: Vec::new(),
      }
   }

   fn on(mut self, pattern: &str, reaction: Reaction) -> Self {
      let pattern = Regex::new(pattern).expect("reaction pattern");
      self.patterns.push(pattern);
      self.reactions.push(reaction);
      self
   }

   /// Finishes the step on a complete line containing `pattern`.
   fn finish(self, pattern: &str, outcome: Outcome) -> Self {
      self.on(&format!(r"{pattern}[^\n]*\n"), Reaction::Finish(outcome))
   }

   fn done(self, pattern: &str) -> Self {
      self.finish(pattern, Outcome::Done)
   }

   fn already(self, pattern: &str) -> Self {
      self.finish(pattern, Outcome::AlreadyDone)
   }

   fn unavailable(self, pattern: &str) -> Self {
      self.finish(pattern, Outcome::Unavailable)
   }

   fn failed(self, pattern: &str) -> Self {
      self.finish(pattern, Outcome::Failed)
   }

   fn not_available(self, addr: Address) -> Self {
      self.unavailable(&format!("Device {} not available", addr.pattern()))
   }

   /// Answers the pairing agent's questions.
   fn agent_prompts(self) -> Self {
      self
         .on(r"Confirm passkey \d+ \(yes/no\):", Reaction::Reply("yes"))
         .on(r"Authorize service [^\n]*\(yes/no\):", Reaction::Reply("yes"))
         .on(r"Accept pairing \(yes/no\):", Reaction::Reply("yes"))
         .on(r"Enter PIN code:", Reaction::Reply("0000"))
   }

   pub fn patterns(&self) -> &[Regex] {
      &self.patterns
   }

   pub fn reaction(&self, index: usize) -> Option<Reaction> {
      self.reactions.get(index).copied()
   }
}

impl Action {
   /// The command line sent to the control shell.
   pub fn command(&self) -> String {
      match self {
         Self::PowerOn => "power on".into(),
         Self::PowerOff => "power off".into(),
         Self::Agent => "agent on".into(),
         Self::DefaultAgent => "default-agent".into(),
         Self::Disconnect(addr) => format!("disconnect {addr}"),
         Self::Remove(addr) => format!("remove {addr}"),
         Self::ScanOn => "scan on".into(),
         Self::ScanOff => "scan off".into(),
         Self::Pair(addr) => format!("pair {addr}"),
         Self::Trust(addr) => format!("trust {addr}"),
         Self::Connect(addr) => format!("connect {addr}"),
      }
   }

   pub const fn address(&self) -> Option<Address> {
      match self {
         Self::Disconnect(addr)
         | Self::Remove(addr)
         | Self::Pair(addr)
         | Self::Trust(addr)
         | Self::Connect(addr) => Some(*addr),
         _ => None,
      }
   }

   /// Whether the step talks to the remote device and may take a while.
   pub const fn is_slow(&self) -> bool {
      matches!(self, Self::Pair(_) | Self::Connect(_))
   }

   /// Whether `outcome` lets a procedure carry on after this step.
   pub const fn tolerates(&self, outcome: Outcome) -> bool {
      match outcome {
         Outcome::Done | Outcome::AlreadyDone => true,
         Outcome::Unavailable => {
            matches!(self, Self::Disconnect(_) | Self::Remove(_) | Self::ScanOff)
         },
         Outcome::Failed => false,
      }
   }

   /// Reply patterns, most specific first where two can match at the
   /// same offset.
   pub fn reactions(&self) -> Reactions {
      let table = Reactions::new();
      match *self {
         Self::PowerOn => table
            .done("Changing power on succeeded")
            .failed(r"Failed to set power on")
            .failed("No default controller available"),
         Self::PowerOff => table
            .done("Changing power off succeeded")
            .failed(r"Failed to set power off")
            .failed("No default controller available"),
         Self::Agent => table
            .already("Agent is already registered")
            .done("Agent registered")
            .failed(r"Failed to register agent"),
         Self::DefaultAgent => table
            .done("Default agent request successful")
            .failed("No agent is registered")
            .failed(r"Failed to request default agent"),
         Self::Disconnect(addr) => table
            .done("Successful disconnected")
            .already(r"Failed to disconnect: org\.bluez\.Error\.NotConnected")
            .failed(r"Failed to disconnect")
            .not_available(addr),
         Self::Remove(addr) => table
            .done("Device has been removed")
            .failed(r"Failed to remove device")
            .not_available(addr),
         Self::ScanOn => table
            .done("Discovery started")
            .already(r"Failed to start discovery: org\.bluez\.Error\.InProgress")
            .failed(r"Failed to start discovery"),
         Self::ScanOff => table
            .done("Discovery stopped")
            .unavailable(r"Failed to stop discovery"),
         Self::Pair(addr) => table
            .done("Pairing successful")
            .already(r"Failed to pair: org\.bluez\.Error\.AlreadyExists")
            .failed(r"Failed to pair")
            .not_available(addr)
            .agent_prompts(),
         Self::Trust(addr) => table
            .done(&format!("Changing {} trust succeeded", addr.pattern()))
            .failed(r"Failed to set trusted")
            .not_available(addr),
         Self::Connect(addr) => table
            .done("Connection successful")
            .already(r"Failed to connect: org\.bluez\.Error\.AlreadyConnected")
            .failed(r"Failed to connect")
            .not_available(addr)
            .agent_prompts(),
      }
   }
}
