//! Record of a control shell session.
//!
//! The transcript of the last run is kept in the per-user cache
//! directory so a fix that went wrong can be inspected afterwards.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use crate::error::{BlError, Result};

const TRANSCRIPT_FILE: &str = "last-session.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
   Sent(String),
   Received(String),
}

#[derive(Debug, Default, Clone)]
pub struct Transcript {
   entries: Vec<Entry>,
}

impl Transcript {
   pub const fn new() -> Self {
      Self {
         entries: Vec::new(),
      }
   }

   pub fn sent(&mut self, line: &str) {
      self.entries.push(Entry::Sent(line.to_owned()));
   }

   /// Appends received output, merging it into a preceding received entry.
   pub fn received(&mut self, text: &str) {
      if text.is_empty() {
         return;
      }
      if let Some(Entry::Received(last)) = self.entries.last_mut() {
         last.push_str(text);
      } else {
         self.entries.push(Entry::Received(text.to_owned()));
      }
   }

   pub fn render(&self) -> String {
      let mut out = String::new();
      for entry in &self.entries {
         match entry {
            Entry::Sent(line) => {
               if !out.is_empty() && !out.ends_with('\n') {
                  out.push('\n');
               }
               out.push_str("> ");
               out.push_str(line);
               out.push('\n');
            },
            Entry::Received(text) => out.push_str(text),
         }
      }
      if !out.is_empty() && !out.ends_with('\n') {
         out.push('\n');
      }
      out
   }

   pub fn save(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      fs::write(path, self.render())?;
      Ok(())
   }
}

/// Location of the last session's transcript.
pub fn transcript_path() -> Result<PathBuf> {
   let cache_dir = if let Ok(bl_home) = env::var("BL_HOME") {
      PathBuf::from(bl_home)
   } else {
      dirs::cache_dir()
         .ok_or(BlError::ConfigDirNotFound)?
         .join("bl")
   };

   Ok(cache_dir.join(TRANSCRIPT_FILE))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_received_chunks_merge() {
      let mut transcript = Transcript::new();
      transcript.received("Changing power ");
      transcript.received("on succeeded\n");
      transcript.sent("agent on");
      transcript.received("");
      transcript.received("Agent registered");

      assert_eq!(
         transcript.entries,
         vec![
            Entry::Received("Changing power on succeeded\n".into()),
            Entry::Sent("agent on".into()),
            Entry::Received("Agent registered".into()),
         ]
      );
   }

   #[test]
   fn test_render_and_save() {
      let mut transcript = Transcript::new();
      transcript.sent("power on");
      transcript.received("[bluetooth]# Changing power on succeeded");
      transcript.sent("connect AA:BB:CC:DD:EE:FF");
      transcript.received("Connection successful\n");

      let expected = "> power on\n\
                      [bluetooth]# Changing power on succeeded\n\
                      > connect AA:BB:CC:DD:EE:FF\n\
                      Connection successful\n";
      assert_eq!(transcript.render(), expected);

      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("nested").join(TRANSCRIPT_FILE);
      transcript.save(&path).unwrap();
      assert_eq!(fs::read_to_string(&path).unwrap(), expected);
   }
}
