//! Pending/committed two-slot state
//!
//! Data collected while a main-frame navigation is in flight is written to the
//! pending slot and only becomes visible once that navigation commits.

/// A value with an optional pending replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffered<T> {
    pending: Option<T>,
    committed: T,
}

impl<T: Default> Buffered<T> {
    pub fn new(committed: T) -> Self {
        Self {
            pending: None,
            committed,
        }
    }

    /// Externally visible value.
    pub fn committed(&self) -> &T {
        &self.committed
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }

    pub fn is_buffering(&self) -> bool {
        self.pending.is_some()
    }

    /// Start buffering into a fresh pending value, dropping any previous one.
    pub fn begin(&mut self) {
        self.pending = Some(T::default());
    }

    /// Start buffering only if not already doing so.
    pub fn ensure_buffering(&mut self) {
        if self.pending.is_none() {
            self.begin();
        }
    }

    /// The slot writes should go to right now.
    pub fn current_mut(&mut self) -> &mut T {
        match &mut self.pending {
            Some(pending) => pending,
            None => &mut self.committed,
        }
    }

    /// Replace the committed value with the pending one, if any.
    pub fn commit(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.committed = pending;
        }
    }

    pub fn discard(&mut self) {
        self.pending = None;
    }
}
