//! The journal context: identity table, class registry, transaction
//! buffer, file handle and counters, plus every public operation hosts
//! call.
//!
//! One `Journal` value owns everything that was process-global in earlier
//! generations of this engine. Methods take `&mut self`; hosts that share
//! a journal across control threads wrap it in their own lock. The
//! real-time audio thread never calls in here -- mutating entry points run
//! only while the host's freeze lock keeps the audio thread off shared
//! state, and every operation completes synchronously on the calling
//! thread.

mod identity;
mod replay;
mod snapshot;
mod transaction;
mod undo;


use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use regex::Regex;

use vireo_types::{Entry, LogId};

use crate::error::JournalError;
use crate::loggable::{CreateFn, Loggable};

use identity::IdentityTable;
use transaction::TransactionBuffer;

/// `<classname> <id> <verb> <rest>`; the rest (payloads, `<<` separator)
/// is handled by the payload splitter.
const RECORD_PATTERN: &str = r"^(\S+) (\S+) (\S+)(?: (.*))?$";

type ProgressFn = Box<dyn FnMut(i32) + Send>;
type SnapshotFn = Box<dyn FnMut(&mut Journal) + Send>;
type DirtyFn = Box<dyn FnMut(i32) + Send>;

/// The persistent object journal.
///
/// Records every creation, mutation and destruction of registered
/// [`Loggable`] objects as line-oriented text, replays that text on
/// [`open`](Journal::open) to reconstruct state, walks it backwards for
/// [`undo`](Journal::undo), and collapses history into snapshots.
pub struct Journal {
    classes: HashMap<String, CreateFn>,
    table: IdentityTable,
    transaction: TransactionBuffer,
    /// Block nesting depth; the transaction commits when it returns to 0.
    level: i32,
    file: Option<File>,
    /// Directory holding the journal plus its `snapshot` and
    /// `unjournaled` siblings. Set while open.
    dir: Option<PathBuf>,
    readonly: bool,
    /// Byte offset of the end of the most recent transaction still
    /// reachable by undo.
    undo_offset: u64,
    dirty: i32,
    replaying: bool,
    record_re: Regex,
    progress_cb: Option<ProgressFn>,
    snapshot_cb: Option<SnapshotFn>,
    dirty_cb: Option<DirtyFn>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        let record_re = match Regex::new(RECORD_PATTERN) {
            Ok(re) => re,
            Err(e) => panic!("record pattern failed to compile: {}", e),
        };
        Self {
            classes: HashMap::new(),
            table: IdentityTable::new(),
            transaction: TransactionBuffer::new(),
            level: 0,
            file: None,
            dir: None,
            readonly: false,
            undo_offset: 0,
            dirty: 0,
            replaying: false,
            record_re,
            progress_cb: None,
            snapshot_cb: None,
            dirty_cb: None,
        }
    }

    /// Register the factory that reconstructs `name` objects during
    /// replay. An unregistered class appearing in a journal is fatal to
    /// the replay.
    pub fn register_create<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Entry, LogId) -> Box<dyn Loggable> + Send + 'static,
    {
        self.classes.insert(name.into(), Box::new(factory));
    }

    /// Replay progress, in percent.
    pub fn set_progress_callback<F>(&mut self, f: F)
    where
        F: FnMut(i32) + Send + 'static,
    {
        self.progress_cb = Some(Box::new(f));
    }

    /// Invoked during snapshot emission. The callback walks the host's
    /// object graph (parents before children) and calls
    /// [`emit_create`](Journal::emit_create) for every member.
    pub fn set_snapshot_callback<F>(&mut self, f: F)
    where
        F: FnMut(&mut Journal) + Send + 'static,
    {
        self.snapshot_cb = Some(Box::new(f));
    }

    /// Signaled with the new count whenever the dirty counter changes.
    pub fn set_dirty_callback<F>(&mut self, f: F)
    where
        F: FnMut(i32) + Send + 'static,
    {
        self.dirty_cb = Some(Box::new(f));
    }

    /// Open the journal at `path` and replay it, bringing the end state
    /// back into RAM. Falls back to read-only when the file cannot be
    /// opened for appending. The `unjournaled` side-file and `snapshot`
    /// are looked up beside `path`; a snapshot fresher than the journal
    /// replays in its place.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), JournalError> {
        let path = path.as_ref();

        self.readonly = false;
        let mut file = match OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    target: "journal",
                    "could not open {} for writing: {}", path.display(), e
                );
                match OpenOptions::new().read(true).open(path) {
                    Ok(f) => {
                        self.readonly = true;
                        f
                    }
                    Err(e) => {
                        warn!(
                            target: "journal",
                            "could not open {} for reading: {}", path.display(), e
                        );
                        return Err(JournalError::Io(e));
                    }
                }
            }
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        self.load_unjournaled_state(&dir.join("unjournaled"));

        // No file handle is installed yet, so nothing replayed here is
        // re-emitted.
        let snapshot_path = dir.join("snapshot");
        if snapshot::newer(&snapshot_path, path) {
            info!(target: "journal", "loading snapshot");
            self.replay(&snapshot_path)?;
        } else {
            info!(target: "journal", "replaying journal");
            let total = file.metadata().map(|m| m.len()).unwrap_or_default();
            self.replay_stream(BufReader::new(&file), total, true)?;
        }

        self.undo_offset = file.seek(SeekFrom::End(0))?;
        self.dir = Some(dir);
        self.file = Some(file);
        Ok(())
    }

    /// Close the journal: snapshot to `snapshot` beside it, save the
    /// `unjournaled` side-file, then destroy every live object, returning
    /// the process to a blank slate. Persistence failures are reported
    /// after teardown completes.
    pub fn close(&mut self) -> Result<(), JournalError> {
        debug!(
            target: "journal",
            "closing journal and destroying all journaled objects"
        );

        self.file = None;
        let mut result = Ok(());

        if let Some(dir) = self.dir.clone() {
            if let Err(e) = self.snapshot_to(dir.join("snapshot")) {
                warn!(target: "journal", "failed to create snapshot: {}", e);
                result = Err(e);
            }
            if !self.save_unjournaled_state(&dir.join("unjournaled")) {
                warn!(target: "journal", "failed to save unjournaled state");
            }
        }

        // File handle is gone, so destruction emits nothing.
        self.table.clear();
        self.dir = None;
        self.undo_offset = 0;
        result
    }

    /// Open a transaction scope. Any action that might affect multiple
    /// objects must be braced by `block_start`/`block_end` so their
    /// records coalesce into a single undoable step.
    pub fn block_start(&mut self) {
        self.level += 1;
    }

    /// Close a transaction scope; commits the pending transaction when
    /// the outermost scope closes.
    ///
    /// Panics on underflow: a `block_end` without a matching
    /// `block_start` is a host programming error.
    pub fn block_end(&mut self) {
        self.level -= 1;
        if self.level < 0 {
            panic!("block_end() without matching block_start()");
        }
        if self.level == 0 {
            self.flush();
        }
    }

    /// Adopt a newly constructed object: assign it the next id, claim its
    /// identity slot and emit its `create` record. Returns the id.
    pub fn create(&mut self, obj: Box<dyn Loggable>) -> LogId {
        let id = self.table.adopt(obj);
        self.emit_create(id);
        id
    }

    /// Emit a full construction record for the live object at `id`.
    /// Snapshot callbacks call this once per object; host code normally
    /// goes through [`create`](Journal::create) instead.
    pub fn emit_create(&mut self, id: LogId) {
        let line = match self.table.live(id) {
            Some(obj) => {
                let mut e = Entry::new();
                obj.get(&mut e);
                format!("{} {} create {}", obj.class_name(), id, e.print())
            }
            None => {
                warn!(target: "journal", "emit_create: no live object {}", id);
                return;
            }
        };
        self.set_dirty();
        if self.can_write() {
            self.transaction.push_line(line);
        }
        if self.level == 0 {
            self.flush();
        }
    }

    /// Destroy the live object at `id`, emitting a `destroy` record that
    /// carries its final journaled state so undo can rebuild it. The
    /// object's unjournaled state stays remembered under its id.
    pub fn destroy(&mut self, id: LogId) -> Result<(), JournalError> {
        if self.destroy_inner(id) {
            Ok(())
        } else {
            Err(JournalError::NotFound { id })
        }
    }

    /// Shared destruction path; `false` when nothing lives at `id`.
    /// Replay tolerates that (a parent's destruction may already have
    /// cascaded); hosts get an error from [`destroy`](Journal::destroy).
    pub(crate) fn destroy_inner(&mut self, id: LogId) -> bool {
        let obj = {
            let Some(slot) = self.table.slot_mut(id) else {
                return false;
            };
            let Some(obj) = slot.live.take() else {
                return false;
            };
            // The unjournaled state may have changed: make a note of it.
            let mut u = Entry::new();
            obj.get_unjournaled(&mut u);
            slot.unjournaled = if u.is_empty() { None } else { Some(u) };
            slot.old_state = None;
            slot.nest = 0;
            obj
        };

        self.set_dirty();
        if self.can_write() {
            let mut e = Entry::new();
            obj.get(&mut e);
            self.transaction
                .push_line(format!("{} {} destroy << {}", obj.class_name(), id, e.print()));
        }
        if self.level == 0 {
            self.flush();
        }
        true
    }

    /// Start an edit scope on `id`: remember the current journaled
    /// projection for later comparison. Must be balanced with
    /// [`end_edit`](Journal::end_edit); nested scopes on the same object
    /// collapse into a single diff. Prefer [`edit`](Journal::edit), which
    /// guarantees the pairing.
    pub fn begin_edit(&mut self, id: LogId) -> Result<(), JournalError> {
        let Some(slot) = self.table.slot_mut(id) else {
            return Err(JournalError::NotFound { id });
        };
        let Some(obj) = &slot.live else {
            return Err(JournalError::NotFound { id });
        };
        if slot.old_state.is_none() {
            let mut e = Entry::new();
            obj.get(&mut e);
            slot.old_state = Some(e);
        }
        slot.nest += 1;
        Ok(())
    }

    /// Close an edit scope. When the outermost scope closes, diffs the
    /// object's journaled projection against the remembered one and, if
    /// anything changed, emits one bidirectional `set` record.
    ///
    /// Panics when called without a matching
    /// [`begin_edit`](Journal::begin_edit).
    pub fn end_edit(&mut self, id: LogId) {
        let line = {
            let Some(slot) = self.table.slot_mut(id) else {
                panic!("end_edit() on {} without matching begin_edit()", id);
            };
            if slot.old_state.is_none() {
                panic!("end_edit() on {} without matching begin_edit()", id);
            }
            slot.nest -= 1;
            if slot.nest > 0 {
                return;
            }
            let old = match slot.old_state.take() {
                Some(e) => e,
                None => return,
            };
            let obj = match &slot.live {
                Some(obj) => obj,
                None => return,
            };
            let mut new = Entry::new();
            obj.get(&mut new);
            if Entry::diff(&old, &new) {
                let mut payload = new.print();
                if !old.is_empty() {
                    payload.push_str(" << ");
                    payload.push_str(&old.print());
                }
                Some(format!("{} {} set {}", obj.class_name(), id, payload))
            } else {
                None
            }
        };

        if let Some(line) = line {
            if self.can_write() {
                self.transaction.push_line(line);
            }
            self.set_dirty();
        }
        if self.level == 0 {
            self.flush();
        }
    }

    /// Run a mutation against the object at `id` inside an edit scope:
    /// the journal captures the projection before, applies `f`, and emits
    /// a single `set` record if anything observable changed.
    ///
    /// The closing [`end_edit`](Journal::end_edit) runs on every exit,
    /// including unwinding out of `f`, so a panicking mutation cannot
    /// leave the scope bookkeeping unbalanced.
    pub fn edit<R>(
        &mut self,
        id: LogId,
        f: impl FnOnce(&mut dyn Loggable) -> R,
    ) -> Result<R, JournalError> {
        self.begin_edit(id)?;
        let mut scope = EditScope { journal: self, id };
        match scope.journal.table.live_mut(id) {
            Some(obj) => Ok(f(obj)),
            None => Err(JournalError::NotFound { id }),
        }
    }

    /// Typed variant of [`edit`](Journal::edit) for hosts that know the
    /// concrete class.
    pub fn edit_as<T, R>(
        &mut self,
        id: LogId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, JournalError>
    where
        T: Loggable,
    {
        self.begin_edit(id)?;
        let mut scope = EditScope { journal: self, id };
        match scope
            .journal
            .table
            .live_mut(id)
            .and_then(|obj| obj.as_any_mut().downcast_mut::<T>())
        {
            Some(t) => Ok(f(t)),
            None => Err(JournalError::ClassMismatch {
                id,
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Look up a live object. While relative-id mode is active the lookup
    /// is offset like every other stored id.
    pub fn find(&self, id: LogId) -> Option<&dyn Loggable> {
        self.table.find(id)
    }

    /// Typed lookup.
    pub fn find_as<T>(&self, id: LogId) -> Option<&T>
    where
        T: Loggable,
    {
        self.find(id).and_then(|obj| obj.as_any().downcast_ref())
    }

    /// Ids of every live object, ascending. Useful for snapshot callbacks
    /// that have no richer graph to walk.
    pub fn live_ids(&self) -> Vec<LogId> {
        self.table.live_ids()
    }

    /// Ids in replayed streams will be offset past the current maximum
    /// until [`end_relative_id_mode`](Journal::end_relative_id_mode), so
    /// fragments recorded in another session import without collision.
    pub fn begin_relative_id_mode(&mut self) {
        self.table.begin_relative();
    }

    pub fn end_relative_id_mode(&mut self) {
        self.table.end_relative();
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Count of changes since the last snapshot or replay.
    pub fn dirty(&self) -> i32 {
        self.dirty
    }

    /// True while a stream is being replayed. Hosts gate user-initiated
    /// paste against this so a second paste cannot start before the first
    /// completes.
    pub fn replaying(&self) -> bool {
        self.replaying
    }

    /// Allocator high-water mark: the highest id handed out or observed.
    pub fn last_id(&self) -> LogId {
        self.table.last_id()
    }

    pub(crate) fn set_dirty(&mut self) {
        self.dirty += 1;
        let d = self.dirty;
        self.signal_dirty(d);
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = 0;
        self.signal_dirty(0);
    }

    fn signal_dirty(&mut self, v: i32) {
        if let Some(cb) = self.dirty_cb.as_mut() {
            cb(v);
        }
    }

    pub(crate) fn progress(&mut self, percent: i32) {
        if let Some(cb) = self.progress_cb.as_mut() {
            cb(percent);
        }
    }

    /// Whether emitted records have somewhere to go. False during
    /// open-replay (no handle installed yet) and in read-only sessions.
    fn can_write(&self) -> bool {
        self.file.is_some() && !self.readonly
    }

    /// Commit the pending transaction: a single line is emitted bare, a
    /// multi-line transaction is wrapped in `{`/`}` with each record
    /// tab-indented. Advances the undo offset to the new end of file.
    ///
    /// Write failures are reported and swallowed; the journal keeps
    /// operating on in-memory state.
    pub(crate) fn flush(&mut self) {
        if !self.can_write() {
            self.transaction.discard();
            return;
        }
        if self.transaction.is_empty() {
            return;
        }
        let lines = self.transaction.drain();
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let mut out = String::new();
        if lines.len() > 1 {
            out.push_str("{\n");
            for line in &lines {
                out.push('\t');
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("}\n");
        } else {
            out.push_str(&lines[0]);
            out.push('\n');
        }

        if let Err(e) = file.write_all(out.as_bytes()) {
            warn!(target: "journal", "failed to write transaction: {}", e);
            return;
        }
        match file.stream_position() {
            Ok(pos) => self.undo_offset = pos,
            Err(e) => warn!(target: "journal", "failed to query journal position: {}", e),
        }
        if let Err(e) = file.flush() {
            warn!(target: "journal", "failed to flush journal: {}", e);
        }
    }
}

/// Balances an edit scope on drop, so the `begin_edit`/`end_edit` pairing
/// holds on every control-flow exit -- unwinding out of a mutation closure
/// included. Only constructed after `begin_edit` has succeeded, so the
/// drop-time `end_edit` cannot itself panic.
struct EditScope<'a> {
    journal: &'a mut Journal,
    id: LogId,
}

impl Drop for EditScope<'_> {
    fn drop(&mut self) {
        self.journal.end_edit(self.id);
    }
}
