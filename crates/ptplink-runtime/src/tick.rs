//! Interrupt-to-main-loop tick handoff

use std::sync::atomic::{AtomicBool, Ordering};

/// Single-slot "a tick occurred" flag.
///
/// The interrupt handler is the only writer of `true`; the dispatch loop is
/// the only reader, and clears the flag as it reads. Ticks raised before the
/// loop observes the flag coalesce: two raises followed by one `take()` yield
/// one periodic handler call, not two.
#[derive(Debug, Default)]
pub struct TickFlag {
    pending: AtomicBool,
}

impl TickFlag {
    pub const fn new() -> Self {
        TickFlag {
            pending: AtomicBool::new(false),
        }
    }

    /// Interrupt context: record that a tick occurred. A single store.
    #[inline]
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Main loop: read and clear. True if at least one tick arrived since
    /// the last `take()`.
    #[inline]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Peek without clearing
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
