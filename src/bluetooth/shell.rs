//! Control shell transport.
//!
//! This module spawns the interactive Bluetooth control shell with piped
//! standard streams and provides expect-style interaction on top of it:
//! writing command lines and waiting, with a deadline, for output that
//! matches one of several patterns.

use std::{process::Stdio, sync::LazyLock, time::Duration};

use log::{debug, trace, warn};
use regex::Regex;
use smol_str::SmolStr;
use tokio::{
   io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
   process::{Child, Command},
   sync::mpsc,
   task::JoinHandle,
   time::{self, Instant},
};

use crate::{
   error::{BlError, Result},
   transcript::Transcript,
};

/// Size of a single read from the shell's output
const READ_CHUNK_SIZE: usize = 1024;
/// Output chunks buffered between the reader tasks and the session
const CHANNEL_BUFFER_SIZE: usize = 64;
/// Time the shell gets to exit after `quit`
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);
/// Harmless command whose reply delimits the output of the command before it
const FENCE_COMMAND: &str = "version";
/// Longest wait a deadline is computed for
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

static ESCAPES: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|[\x01\x02\r]").expect("escape pattern"));

static PARTIAL_ESCAPE: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"\x1b(?:\[[0-9;?]*)?\z").expect("partial escape pattern"));

static FENCE_REPLY: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"Version \d+(?:\.\d+)*").expect("fence pattern"));

/// Removes terminal escape sequences, readline markers and carriage returns.
pub fn strip_escapes(text: &str) -> String {
   ESCAPES.replace_all(text, "").into_owned()
}

/// Instant `timeout` from now, saturating for very long timeouts.
pub fn deadline_after(timeout: Duration) -> Instant {
   let now = Instant::now();
   now.checked_add(timeout).unwrap_or_else(|| now + MAX_WAIT)
}

/// Output that satisfied an [`Shell::expect`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
   /// Index of the pattern that matched.
   pub index: usize,
   /// Output preceding the match.
   pub before: String,
   /// The matched text.
   pub text: String,
}

/// An interactive session with the control shell.
pub struct Shell {
   writer: Box<dyn AsyncWrite + Send + Unpin>,
   output: mpsc::Receiver<String>,
   reader: JoinHandle<()>,
   child: Option<Child>,
   buffer: String,
   partial: String,
   transcript: Transcript,
}

impl Shell {
   /// Starts `program` and attaches to its standard input and output.
   pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
      let mut child = Command::new(program)
         .args(args)
         .stdin(Stdio::piped())
         .stdout(Stdio::piped())
         .stderr(Stdio::null())
         .kill_on_drop(true)
         .spawn()
         .map_err(|source| BlError::ShellSpawn {
            program: program.into(),
            source,
         })?;

      let stdin = child.stdin.take().ok_or(BlError::ShellExited)?;
      let stdout = child.stdout.take().ok_or(BlError::ShellExited)?;
      debug!("Started {program} (pid {:?})", child.id());

      let mut shell = Self::from_io(stdout, stdin);
      shell.child = Some(child);
      Ok(shell)
   }

   /// Drives a session over an arbitrary byte stream pair.
   pub fn from_io<R, W>(reader: R, writer: W) -> Self
   where
      R: AsyncRead + Send + Unpin + 'static,
      W: AsyncWrite + Send + Unpin + 'static,
   {
      let (tx, output) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      Self {
         writer: Box::new(writer),
         output,
         reader: spawn_reader(reader, tx),
         child: None,
         buffer: String::new(),
         partial: String::new(),
         transcript: Transcript::new(),
      }
   }

   pub fn transcript(&self) -> &Transcript {
      &self.transcript
   }

   /// Writes one command line to the shell.
   pub async fn send_line(&mut self, line: &str) -> Result<()> {
      debug!("> {line}");
      self.transcript.sent(line);
      self.write_all(line.as_bytes()).await?;
      self.write_all(b"\n").await?;
      self.writer.flush().await.map_err(broken_pipe)
   }

   async fn write_all(&mut self, data: &[u8]) -> Result<()> {
      self.writer.write_all(data).await.map_err(broken_pipe)
   }

   /// Drops output that arrived before the next command is sent.
   pub fn discard_pending(&mut self) {
      while let Ok(chunk) = self.output.try_recv() {
         self.absorb(&chunk);
      }
      if !self.buffer.is_empty() {
         trace!("Discarding stale output: {:?}", self.buffer);
         self.buffer.clear();
      }
   }

   /// Waits until one of `patterns` matches the shell's output.
   ///
   /// The earliest match in the output wins; patterns matching at the same
   /// offset are ranked by their order in `patterns`. Output up to the end
   /// of the match is consumed.
   pub async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<Match> {
      let deadline = deadline_after(timeout);
      loop {
         if let Some(found) = self.find(patterns) {
            trace!("Matched pattern {} on {:?}", found.index, found.text);
            return Ok(found);
         }

         match time::timeout_at(deadline, self.output.recv()).await {
            Ok(Some(chunk)) => self.absorb(&chunk),
            Ok(None) => return Err(BlError::ShellExited),
            Err(_) => {
               return Err(BlError::Timeout {
                  waiting_for: describe(patterns),
                  after: timeout,
               });
            },
         }
      }
   }

   /// Sends `command` followed by a fence and returns everything the shell
   /// printed before the fence's reply.
   pub async fn fenced(&mut self, command: &str, timeout: Duration) -> Result<String> {
      self.discard_pending();
      self.send_line(command).await?;
      self.send_line(FENCE_COMMAND).await?;
      let found = self
         .expect(std::slice::from_ref(&*FENCE_REPLY), timeout)
         .await?;
      Ok(found.before)
   }

   /// Asks the shell to exit, killing it if it does not.
   pub async fn quit(&mut self) {
      if let Err(e) = self.send_line("quit").await {
         debug!("Could not send quit: {e}");
      }

      if let Some(mut child) = self.child.take() {
         match time::timeout(QUIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!("Control shell exited with {status}"),
            Ok(Err(e)) => warn!("Failed to wait for control shell: {e}"),
            Err(_) => {
               warn!("Control shell did not exit, killing it");
               if let Err(e) = child.kill().await {
                  warn!("Failed to kill control shell: {e}");
               }
            },
         }
      }

      while let Ok(chunk) = self.output.try_recv() {
         self.absorb(&chunk);
      }
   }

   fn absorb(&mut self, chunk: &str) {
      let mut text = std::mem::take(&mut self.partial);
      text.push_str(chunk);
      // An escape sequence cut off by the chunk boundary waits for the rest.
      if let Some(start) = PARTIAL_ESCAPE.find(&text).map(|m| m.start()) {
         self.partial = text.split_off(start);
      }

      let clean = strip_escapes(&text);
      trace!("< {clean:?}");
      self.transcript.received(&clean);
      self.buffer.push_str(&clean);
   }

   fn find(&mut self, patterns: &[Regex]) -> Option<Match> {
      let (index, whole) = patterns
         .iter()
         .enumerate()
         .filter_map(|(i, re)| re.find(&self.buffer).map(|m| (i, m)))
         .min_by_key(|(i, m)| (m.start(), *i))?;

      let end = whole.end();
      let found = Match {
         index,
         before: self.buffer[..whole.start()].to_owned(),
         text: whole.as_str().to_owned(),
      };

      self.buffer.drain(..end);
      Some(found)
   }
}

impl Drop for Shell {
   fn drop(&mut self) {
      self.reader.abort();
   }
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
   R: AsyncRead + Send + Unpin + 'static,
{
   tokio::spawn(async move {
      let mut buf = [0u8; READ_CHUNK_SIZE];
      let mut carry = Vec::new();
      loop {
         let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
               warn!("Error reading from control shell: {e}");
               break;
            },
         };
         carry.extend_from_slice(&buf[..n]);
         let chunk = decode_utf8(&mut carry);
         if !chunk.is_empty() && tx.send(chunk).await.is_err() {
            return;
         }
      }

      if !carry.is_empty() {
         let _ = tx.send(String::from_utf8_lossy(&carry).into_owned()).await;
      }
   })
}

/// Decodes the complete part of `carry`, leaving a trailing partial
/// UTF-8 sequence in place for the next read.
fn decode_utf8(carry: &mut Vec<u8>) -> String {
   let valid = match std::str::from_utf8(carry) {
      Ok(_) => carry.len(),
      Err(e) if e.error_len().is_none() => e.valid_up_to(),
      Err(_) => {
         let text = String::from_utf8_lossy(carry).into_owned();
         carry.clear();
         return text;
      },
   };

   let decoded: Vec<u8> = carry.drain(..valid).collect();
   String::from_utf8(decoded).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn describe(patterns: &[Regex]) -> SmolStr {
   patterns
      .iter()
      .map(Regex::as_str)
      .collect::<Vec<_>>()
      .join(" | ")
      .into()
}

fn broken_pipe(e: std::io::Error) -> BlError {
   if e.kind() == std::io::ErrorKind::BrokenPipe {
      BlError::ShellExited
   } else {
      BlError::Io(e)
   }
}
