/// Counts mutations and signals when a save is due.
///
/// `every == 0` disables mutation-triggered saves.
#[derive(Debug, Clone)]
pub struct WriteCoalescer {
    every: u32,
    pending: u32,
}

impl WriteCoalescer {
    pub fn new(every: u32) -> Self {
        Self { every, pending: 0 }
    }

    /// Record one mutation. Returns `true` when the caller should save now.
    ///
    /// Stays `true` for every further mutation until [`Self::mark_saved`],
    /// so a failed save is retried on the next change.
    pub fn note_mutation(&mut self) -> bool {
        self.pending = self.pending.saturating_add(1);
        self.every > 0 && self.pending >= self.every
    }

    /// Whether anything changed since the last save.
    pub fn is_dirty(&self) -> bool {
        self.pending > 0
    }

    /// Reset after any save, periodic or triggered.
    pub fn mark_saved(&mut self) {
        self.pending = 0;
    }
}
