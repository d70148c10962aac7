//! Scripted stand-in for the control shell, for tests.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::bluetooth::shell::Shell;

const PROMPT: &str = "\x01\x1b[0;94m\x02[bluetooth]\x01\x1b[0m\x02# ";

/// Splits a reply: the fake stops writing for a moment at this marker.
pub const PAUSE: &str = "<pause>";

/// Lines received by the fake shell, in order, without fence commands.
#[derive(Clone, Default)]
pub struct Received(Arc<Mutex<Vec<String>>>);

impl Received {
   pub fn lines(&self) -> Vec<String> {
      self.0.lock().clone()
   }

   pub fn count(&self, prefix: &str) -> usize {
      self.0.lock().iter().filter(|l| l.starts_with(prefix)).count()
   }
}

/// Starts a fake shell that answers each command line with `respond`.
///
/// `version` is answered by the fake itself so fenced commands work.
pub fn fake_shell<F>(mut respond: F) -> (Shell, Received)
where
   F: FnMut(&str) -> String + Send + 'static,
{
   let (client, server) = tokio::io::duplex(64 * 1024);
   let (client_read, client_write) = tokio::io::split(client);
   let (server_read, mut server_write) = tokio::io::split(server);
   let received = Received::default();
   let log = received.clone();

   tokio::spawn(async move {
      let mut lines = BufReader::new(server_read).lines();
      if server_write.write_all(PROMPT.as_bytes()).await.is_err() {
         return;
      }
      while let Ok(Some(line)) = lines.next_line().await {
         let reply = if line == "version" {
            "Version 5.66\n".to_string()
         } else {
            log.0.lock().push(line.clone());
            if line == "quit" {
               break;
            }
            respond(&line)
         };
         if write_paced(&mut server_write, &reply).await.is_err()
            || server_write.write_all(PROMPT.as_bytes()).await.is_err()
         {
            break;
         }
      }
   });

   (Shell::from_io(client_read, client_write), received)
}

async fn write_paced<W>(writer: &mut W, reply: &str) -> std::io::Result<()>
where
   W: AsyncWrite + Unpin,
{
   for (i, part) in reply.split(PAUSE).enumerate() {
      if i > 0 {
         writer.flush().await?;
         tokio::time::sleep(Duration::from_millis(20)).await;
      }
      writer.write_all(part.as_bytes()).await?;
   }
   Ok(())
}

/// Replies of a shell whose headset behaves.
pub fn healthy(line: &str) -> String {
   let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
   match (command, arg) {
      ("power", "on") => "Changing power on succeeded\n".into(),
      ("power", "off") => "Changing power off succeeded\n".into(),
      ("agent", "on") => "Agent registered\n".into(),
      ("default-agent", _) => "Default agent request successful\n".into(),
      ("select", _) => String::new(),
      ("disconnect", addr) => format!(
         "Attempting to disconnect from {addr}\n[CHG] Device {addr} Connected: no\nSuccessful disconnected\n"
      ),
      ("remove", addr) => format!("[DEL] Device {addr} Headset\nDevice has been removed\n"),
      ("scan", "on") => "Discovery started\n\
                         [CHG] Controller 00:11:22:33:44:55 Discovering: yes\n\
                         [NEW] Device 00:1B:66:0A:BC:EF MOMENTUM TW\n"
         .into(),
      ("scan", "off") => {
         "Discovery stopped\n[CHG] Controller 00:11:22:33:44:55 Discovering: no\n".into()
      },
      ("pair", addr) => {
         format!("Attempting to pair with {addr}\n[CHG] Device {addr} Paired: yes\nPairing successful\n")
      },
      ("trust", addr) => {
         format!("[CHG] Device {addr} Trusted: yes\nChanging {addr} trust succeeded\n")
      },
      ("connect", addr) => format!(
         "Attempting to connect to {addr}\n[CHG] Device {addr} Connected: yes\nConnection successful\n"
      ),
      ("info", addr) => info_reply(addr, false),
      ("devices", _) => "Device 00:1B:66:0A:BC:EF MOMENTUM TW\n\
                         Device 11:22:33:44:55:66 Speaker\n"
         .into(),
      _ => "Invalid command\n".into(),
   }
}

pub fn info_reply(addr: &str, connected: bool) -> String {
   let connected = if connected { "yes" } else { "no" };
   format!(
      "Device {addr} (public)\n\tName: MOMENTUM TW\n\tAlias: MOMENTUM TW\n\tPaired: yes\n\
       \tTrusted: yes\n\tBlocked: no\n\tConnected: {connected}\n\tBattery Percentage: 0x3c (60)\n"
   )
}
