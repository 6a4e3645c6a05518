//! Pending-transaction buffer.
//!
//! Record lines produced while a block is open accumulate here; the
//! journal drains them as one unit when the outermost block closes. The
//! braced multi-line form is the unit of undo.

/// Complete lines (no trailing newline) awaiting commit.
#[derive(Default)]
pub(crate) struct TransactionBuffer {
    pending: Vec<String>,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: String) {
        debug_assert!(!line.contains('\n'));
        self.pending.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Throw away pending lines; used when there is no writable journal to
    /// commit them to.
    pub fn discard(&mut self) {
        self.pending.clear();
    }
}
