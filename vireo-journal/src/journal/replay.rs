//! Record parsing and forward replay.
//!
//! One journal line is one logical record:
//!
//! ```text
//! <classname> <id-hex> <verb> [<payload>] [<< <reverse-payload>]
//! ```
//!
//! Verbs are `create`, `set` and `destroy`. Applied in reverse (undo), a
//! `create` acts as a destroy, a `destroy` rebuilds the object from its
//! reverse payload, and a `set` applies its reverse payload.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;

use vireo_types::Entry;

use crate::error::JournalError;

use super::Journal;

/// Split a record's remainder into forward and reverse payloads at the
/// `<<` marker, honoring quoted strings so an escaped value can never be
/// mistaken for the separator.
fn split_payloads(rest: &str) -> (&str, Option<&str>) {
    let b = rest.as_bytes();
    let mut quoted = false;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'\\' if quoted => i += 1,
            b'"' => quoted = !quoted,
            b'<' if !quoted && b.get(i + 1) == Some(&b'<') => {
                return (rest[..i].trim_end(), Some(rest[i + 2..].trim_start()));
            }
            _ => {}
        }
        i += 1;
    }
    (rest.trim_end(), None)
}

enum Action<'a> {
    Create(&'a str),
    Set(&'a str),
    Destroy,
}

impl Journal {
    /// Execute one record like `Widget 0xF1 set pos 123 << pos 7`,
    /// forwards or in reverse.
    pub(crate) fn apply_record(&mut self, line: &str, reverse: bool) -> Result<(), JournalError> {
        let caps = match self.record_re.captures(line) {
            Some(c) => c,
            None => {
                return Err(JournalError::Malformed {
                    line: line.to_string(),
                })
            }
        };
        let class = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let id = match caps.get(2).map(|m| m.as_str()).unwrap_or_default().parse() {
            Ok(id) => id,
            Err(_) => {
                return Err(JournalError::Malformed {
                    line: line.to_string(),
                })
            }
        };
        let verb = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let rest = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        let (forward, backward) = split_payloads(rest);

        if reverse {
            debug!(target: "journal::replay", "undoing \"{}\"", line);
        }

        let action = match (verb, reverse) {
            ("create", false) => Action::Create(forward),
            ("create", true) => Action::Destroy,
            ("destroy", false) => Action::Destroy,
            ("destroy", true) => Action::Create(backward.unwrap_or_default()),
            ("set", false) => Action::Set(forward),
            ("set", true) => Action::Set(backward.unwrap_or_default()),
            _ => {
                return Err(JournalError::Malformed {
                    line: line.to_string(),
                })
            }
        };

        match action {
            Action::Destroy => {
                let rid = self.table.resolve(id);
                if !self.destroy_inner(rid) {
                    // A parent's destruction may already have cascaded to
                    // this object; tolerated by contract.
                    debug!(
                        target: "journal::replay",
                        "destroy of already-absent object {}", rid
                    );
                }
                Ok(())
            }
            Action::Set(payload) => {
                let e = Entry::parse(payload).map_err(|source| JournalError::BadPayload {
                    line: line.to_string(),
                    source,
                })?;
                let rid = self.table.resolve(id);
                if self.table.live(rid).is_none() {
                    return Err(JournalError::MissingObject {
                        id: rid,
                        line: line.to_string(),
                    });
                }
                self.begin_edit(rid)?;
                if let Some(obj) = self.table.live_mut(rid) {
                    obj.set(&e);
                }
                self.end_edit(rid);
                Ok(())
            }
            Action::Create(payload) => {
                let e = Entry::parse(payload).map_err(|source| JournalError::BadPayload {
                    line: line.to_string(),
                    source,
                })?;
                let rid = self.table.resolve(id);
                let obj = match self.classes.get(class) {
                    Some(factory) => factory(&e, rid),
                    None => {
                        return Err(JournalError::UnknownClass {
                            class: class.to_string(),
                            line: line.to_string(),
                        })
                    }
                };
                self.table.claim(rid, obj)?;
                self.emit_create(rid);

                // The object may have carried unjournaled state under this
                // id in the past; re-apply it now.
                let remembered = self
                    .table
                    .slot_mut(rid)
                    .and_then(|slot| slot.unjournaled.clone());
                if let Some(u) = remembered {
                    if let Some(obj) = self.table.live_mut(rid) {
                        obj.set(&u);
                    }
                }
                Ok(())
            }
        }
    }

    /// Replay a journal or snapshot file, rebuilding process state. The
    /// dirty count is cleared on success.
    pub fn replay(&mut self, path: impl AsRef<Path>) -> Result<(), JournalError> {
        self.replay_path(path.as_ref(), true)
    }

    /// Replay a fragment recorded in another session (a strip, a chain, a
    /// clipboard payload) without clearing the dirty count. Bracket with
    /// [`begin_relative_id_mode`](Journal::begin_relative_id_mode) /
    /// [`end_relative_id_mode`](Journal::end_relative_id_mode) so the
    /// fragment's ids cannot collide.
    pub fn import(&mut self, path: impl AsRef<Path>) -> Result<(), JournalError> {
        self.replay_path(path.as_ref(), false)
    }

    fn replay_path(&mut self, path: &Path, clear_dirty: bool) -> Result<(), JournalError> {
        let file = File::open(path)?;
        let total = file.metadata().map(|m| m.len()).unwrap_or_default();
        self.replay_stream(BufReader::new(file), total, clear_dirty)
    }

    /// Drive one record at a time through [`apply_record`], reporting
    /// progress. The replaying flag is held for the duration so host code
    /// suppresses user-initiated mutations.
    pub(crate) fn replay_stream<R: BufRead>(
        &mut self,
        mut reader: R,
        total: u64,
        clear_dirty: bool,
    ) -> Result<(), JournalError> {
        self.replaying = true;
        self.progress(0);

        let mut current = 0u64;
        let mut line = String::new();
        let mut result = Ok(());
        loop {
            line.clear();
            let n = match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    result = Err(JournalError::Io(e));
                    break;
                }
            };
            current += n as u64;

            // Braces are transaction markers; the records between them
            // execute in order regardless.
            let record = line.trim_end_matches('\n');
            if record != "{" && record != "}" {
                let record = record.strip_prefix('\t').unwrap_or(record);
                if !record.is_empty() {
                    if let Err(e) = self.apply_record(record, false) {
                        result = Err(e);
                        break;
                    }
                }
            }

            if total > 0 {
                self.progress((current.min(total) * 100 / total) as i32);
            }
        }

        self.progress(0);
        if clear_dirty && result.is_ok() {
            self.clear_dirty();
        }
        self.replaying = false;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_forward_and_reverse_payloads() {
        let (fwd, rev) = split_payloads("pos 123 << pos 7");
        assert_eq!(fwd, "pos 123");
        assert_eq!(rev, Some("pos 7"));
    }

    #[test]
    fn no_separator_means_forward_only() {
        let (fwd, rev) = split_payloads("name \"a\"");
        assert_eq!(fwd, "name \"a\"");
        assert_eq!(rev, None);
    }

    #[test]
    fn separator_inside_quotes_is_payload_text() {
        let (fwd, rev) = split_payloads("name \"a << b\" << name \"c\"");
        assert_eq!(fwd, "name \"a << b\"");
        assert_eq!(rev, Some("name \"c\""));
    }

    #[test]
    fn empty_forward_payload() {
        let (fwd, rev) = split_payloads("<< name \"a\"");
        assert_eq!(fwd, "");
        assert_eq!(rev, Some("name \"a\""));
    }
}
