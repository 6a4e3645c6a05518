//! Backward replay: reversing the most recent committed transaction.

use std::cmp::min;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use log::debug;

use crate::error::JournalError;

use super::Journal;

impl Journal {
    /// Reverse the last journal transaction.
    ///
    /// The inverse operations run through the normal logging paths, so
    /// each undo commits a compensating transaction at the end of the
    /// file and the journal stays forward-replayable; the undo offset
    /// then retreats past the undone region so consecutive undos walk
    /// backwards through history.
    ///
    /// A no-op when no journal is open, the journal is read-only, or the
    /// head of the file has been reached.
    pub fn undo(&mut self) -> Result<(), JournalError> {
        if self.file.is_none() || self.readonly {
            return Ok(());
        }
        if self.undo_offset <= 1 {
            // nothing left to undo
            return Ok(());
        }

        let (records, region_start) = self.read_undo_region()?;

        self.block_start();
        let mut result = Ok(());
        for record in &records {
            if let Err(e) = self.apply_record(record, true) {
                result = Err(e);
                break;
            }
        }
        self.block_end();

        if result.is_ok() {
            self.undo_offset = region_start;
        }
        result
    }

    /// Collect the records of the transaction ending at the undo offset,
    /// last record first, along with the byte offset of the region's
    /// start.
    fn read_undo_region(&mut self) -> Result<(Vec<String>, u64), JournalError> {
        let end = self.undo_offset;
        let Some(file) = self.file.as_mut() else {
            return Ok((Vec::new(), end));
        };

        let (last, start) = read_line_backwards(file, end)?;
        if last != "}" {
            return Ok((vec![last], start));
        }

        debug!(target: "journal", "undoing block");
        let mut records = Vec::new();
        let mut pos = start;
        while pos > 0 {
            let (line, line_start) = read_line_backwards(file, pos)?;
            pos = line_start;
            match line.strip_prefix('\t') {
                Some(record) => records.push(record.to_string()),
                // the opening brace
                None => break,
            }
        }
        Ok((records, pos))
    }
}

/// Read the line ending at byte offset `end` (just past its terminating
/// newline) and return it without the newline, plus the offset of its
/// first byte -- where the next backwards read should end. Scans
/// preceding bytes in chunks; lines may be arbitrarily long.
fn read_line_backwards(file: &mut File, end: u64) -> io::Result<(String, u64)> {
    const CHUNK: u64 = 256;

    let mut content_end = end;
    if content_end > 0 {
        let mut b = [0u8; 1];
        file.seek(SeekFrom::Start(content_end - 1))?;
        file.read_exact(&mut b)?;
        if b[0] == b'\n' {
            content_end -= 1;
        }
    }

    let mut start = 0u64;
    let mut pos = content_end;
    let mut buf = [0u8; CHUNK as usize];
    'scan: while pos > 0 {
        let len = min(CHUNK, pos);
        let chunk = &mut buf[..len as usize];
        file.seek(SeekFrom::Start(pos - len))?;
        file.read_exact(chunk)?;
        for i in (0..chunk.len()).rev() {
            if chunk[i] == b'\n' {
                start = pos - len + i as u64 + 1;
                break 'scan;
            }
        }
        pos -= len;
    }

    file.seek(SeekFrom::Start(start))?;
    let mut content = vec![0u8; (content_end - start) as usize];
    file.read_exact(&mut content)?;
    Ok((String::from_utf8_lossy(&content).into_owned(), start))
}
