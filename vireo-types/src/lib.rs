//! # vireo-types
//!
//! Shared type definitions for the vireo family of audio/MIDI applications.
//! This crate contains the data types that cross the boundary between the
//! journal engine, the host applications, and their clipboard/network
//! payloads: object identities and attribute lists.

mod entry;
mod id;

pub use entry::{escape, Entry, EntryParseError, Value};
pub use id::LogId;
