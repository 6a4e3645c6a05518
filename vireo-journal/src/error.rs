//! Error type for journal operations.

use std::fmt;
use std::io;

use vireo_types::{EntryParseError, LogId};

/// Everything that can go wrong while journaling.
///
/// Replay-time variants carry the offending line so the host can abort
/// with a diagnostic naming class, id and context. `block_end` underflow
/// and unbalanced edit scopes are host programming errors and panic
/// instead of appearing here.
#[derive(Debug)]
pub enum JournalError {
    Io(io::Error),
    /// A replayed line did not match the record grammar.
    Malformed { line: String },
    /// A record payload failed to tokenize.
    BadPayload {
        line: String,
        source: EntryParseError,
    },
    /// A replayed `create` named a class with no registered factory.
    UnknownClass { class: String, line: String },
    /// A replayed `set` referenced an id with no live object. Corrupt
    /// journal.
    MissingObject { id: LogId, line: String },
    /// Two objects claimed the same id. Corrupt journal.
    IdCollision {
        id: LogId,
        existing: &'static str,
        incoming: &'static str,
    },
    /// The host referenced an id with no live object.
    NotFound { id: LogId },
    /// A typed accessor found an object of a different class under this id.
    ClassMismatch { id: LogId, expected: &'static str },
    /// The operation needs an open, writable journal.
    NotOpen,
    /// The journal was opened read-only.
    ReadOnly,
    /// Snapshotting requires a registered snapshot callback.
    NoSnapshotCallback,
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "journal I/O error: {}", e),
            Self::Malformed { line } => {
                write!(f, "invalid journal entry format \"{}\"", line)
            }
            Self::BadPayload { line, source } => {
                write!(f, "bad payload in journal entry \"{}\": {}", line, source)
            }
            Self::UnknownClass { class, line } => write!(
                f,
                "journal contains an object of class \"{}\", but no factory \
                 is registered for it (line \"{}\")",
                class, line
            ),
            Self::MissingObject { id, line } => write!(
                f,
                "unable to find object {} referenced by command \"{}\"",
                id, line
            ),
            Self::IdCollision {
                id,
                existing,
                incoming,
            } => write!(
                f,
                "attempt to create object with an id ({}) that already \
                 exists; the existing object is of class \"{}\", the new one \
                 is \"{}\" -- corrupt journal?",
                id, existing, incoming
            ),
            Self::NotFound { id } => write!(f, "no live object with id {}", id),
            Self::ClassMismatch { id, expected } => {
                write!(f, "object {} is not a {}", id, expected)
            }
            Self::NotOpen => write!(f, "no journal open"),
            Self::ReadOnly => write!(f, "journal is read-only"),
            Self::NoSnapshotCallback => write!(f, "no snapshot callback registered"),
        }
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BadPayload { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for JournalError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
