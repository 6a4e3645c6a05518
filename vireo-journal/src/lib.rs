//! # vireo-journal
//!
//! Persistent object journal and undo engine for the vireo family of
//! real-time audio/MIDI applications. Every user-visible entity in a host
//! application -- tracks, regions, effect chains, MIDI events -- implements
//! [`Loggable`]; the [`Journal`] records each creation, mutation and
//! destruction as line-oriented, human-readable append-only text, replays
//! that text on open to reconstruct process state, reads it backwards for
//! bounded undo, and collapses history into periodic snapshots.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use vireo_journal::{create_from_entry, Journal};
//!
//! let mut journal = Journal::new();
//! journal.register_create("Widget", create_from_entry::<Widget>);
//! journal.set_snapshot_callback(|j| {
//!     for id in j.live_ids() {
//!         j.emit_create(id);
//!     }
//! });
//!
//! journal.open("journal")?;
//!
//! // Creation and mutation are recorded as they happen.
//! let id = journal.create(Box::new(Widget::default()));
//! journal.edit_as::<Widget, _>(id, |w| w.name = "bass".into())?;
//!
//! // A multi-object gesture coalesces into one undoable transaction.
//! journal.block_start();
//! // ... mutate several objects ...
//! journal.block_end();
//!
//! journal.undo()?;
//! journal.close()?;
//! ```
//!
//! ## Module overview
//!
//! - [`journal`](Journal) -- the context object owning the identity table,
//!   class registry, transaction buffer, journal file and undo offset, and
//!   every public operation (`open`/`close`/`undo`/`compact`/`snapshot_to`/
//!   `replay`/`import`, block framing, relative-id import mode)
//! - [`loggable`] -- the [`Loggable`] capability trait and the factory
//!   contract for replay-time reconstruction
//! - [`error`] -- [`JournalError`]
//!
//! Threading: the engine is strictly synchronous and single-writer.
//! Mutating entry points must not be called from the audio callback;
//! hosts hold their freeze lock so mutation and audio-thread reads never
//! overlap, and wrap the `Journal` in a lock of their own if several
//! control threads share it.

pub mod error;
pub mod loggable;

mod journal;

pub use error::JournalError;
pub use journal::Journal;
pub use loggable::{create_from_entry, CreateFn, Loggable};

// Re-export the wire types so hosts depend on one crate.
pub use vireo_types::{escape, Entry, EntryParseError, LogId, Value};
