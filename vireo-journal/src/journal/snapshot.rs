//! Snapshots, compaction and the unjournaled side-file.
//!
//! A snapshot is a full re-emission of every live object's construction
//! record, produced by the host's snapshot callback walking its object
//! graph (parents before children). The unjournaled side-file persists
//! the state that survives across sessions but never participates in
//! undo.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, warn};

use vireo_types::{Entry, LogId};

use crate::error::JournalError;

use super::Journal;

/// True when `a` exists and was modified more recently than `b`.
pub(crate) fn newer(a: &Path, b: &Path) -> bool {
    let Ok(meta_a) = fs::metadata(a) else {
        return false;
    };
    let Ok(meta_b) = fs::metadata(b) else {
        return true;
    };
    match (meta_a.modified(), meta_b.modified()) {
        (Ok(ta), Ok(tb)) => ta > tb,
        _ => false,
    }
}

impl Journal {
    /// Emit a snapshot of all live objects through the currently
    /// installed stream, as a single transaction. Clears the dirty count
    /// on success.
    fn run_snapshot(&mut self) -> Result<(), JournalError> {
        let Some(mut cb) = self.snapshot_cb.take() else {
            warn!(target: "journal", "no snapshot callback registered");
            return Err(JournalError::NoSnapshotCallback);
        };

        self.block_start();
        cb(self);
        self.block_end();

        self.snapshot_cb = Some(cb);
        self.clear_dirty();
        Ok(())
    }

    /// Write a snapshot of the current state of all journaled objects to
    /// `path`.
    ///
    /// The snapshot goes to a `#`-prefixed sibling first and is renamed
    /// over `path` only on success, so a failed snapshot never clobbers
    /// the previous one; the temp file is left behind for inspection.
    pub fn snapshot_to(&mut self, path: impl AsRef<Path>) -> Result<(), JournalError> {
        let path = path.as_ref();
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => {
                return Err(JournalError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "snapshot path has no file name",
                )))
            }
        };
        let tmp = path.with_file_name(format!("#{}", name));

        let tmp_file = match File::create(&tmp) {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    target: "journal",
                    "could not open {} for writing: {}", tmp.display(), e
                );
                return Err(JournalError::Io(e));
            }
        };

        // Swap the snapshot stream in for the journal. Emission must work
        // even in read-only sessions, and the undo offset belongs to the
        // journal, not the snapshot.
        let saved_file = self.file.replace(tmp_file);
        let saved_readonly = std::mem::replace(&mut self.readonly, false);
        let saved_offset = self.undo_offset;

        let result = self.run_snapshot();

        self.file = saved_file;
        self.readonly = saved_readonly;
        self.undo_offset = saved_offset;

        result?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Replace the journal with a snapshot of the current state,
    /// discarding all replayable history.
    pub fn compact(&mut self) -> Result<(), JournalError> {
        if self.readonly {
            return Err(JournalError::ReadOnly);
        }
        {
            let Some(file) = self.file.as_mut() else {
                return Err(JournalError::NotOpen);
            };
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
        }
        self.run_snapshot()?;
        if let Some(file) = self.file.as_mut() {
            // An empty snapshot writes nothing, so the offset must be
            // re-anchored here rather than trusting the last flush.
            self.undo_offset = file.seek(SeekFrom::End(0))?;
        }
        Ok(())
    }

    /// Load the `unjournaled` side-file into the identity table. Runs
    /// before replay, so state is already remembered when replayed
    /// `create`s re-claim the ids it names.
    pub(crate) fn load_unjournaled_state(&mut self, path: &Path) -> bool {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(
                    target: "journal",
                    "could not open unjournaled state file {}: {}", path.display(), e
                );
                return false;
            }
        };

        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(target: "journal", "error reading unjournaled state: {}", e);
                    return false;
                }
            };
            let Some((id_token, rest)) = line.split_once(' ') else {
                continue;
            };
            let Some(payload) = rest.strip_prefix("set ") else {
                continue;
            };
            let Ok(id) = id_token.parse::<LogId>() else {
                continue;
            };
            match Entry::parse(payload) {
                Ok(e) if !e.is_empty() => {
                    self.table.slot_entry(id).unjournaled = Some(e);
                }
                Ok(_) => {}
                Err(e) => warn!(
                    target: "journal",
                    "ignoring malformed unjournaled state for {}: {}", id, e
                ),
            }
        }
        true
    }

    /// Save out unjournaled state for all ids: live objects are asked to
    /// refresh their slots first, and dead-but-remembered slots are
    /// written too, so state survives for objects that may be re-created
    /// under the same id later.
    pub(crate) fn save_unjournaled_state(&mut self, path: &Path) -> bool {
        self.table.refresh_unjournaled();

        let file = match File::create(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    target: "journal",
                    "could not open unjournaled state file {} for writing: {}",
                    path.display(),
                    e
                );
                return false;
            }
        };

        let mut out = BufWriter::new(file);
        for (id, slot) in self.table.iter() {
            if let Some(u) = &slot.unjournaled {
                if let Err(e) = writeln!(out, "{} set {}", id, u.print()) {
                    warn!(target: "journal", "error writing unjournaled state: {}", e);
                    return false;
                }
            }
        }
        if let Err(e) = out.flush() {
            warn!(target: "journal", "error writing unjournaled state: {}", e);
            return false;
        }
        true
    }
}
