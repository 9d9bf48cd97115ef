//! Per-thread execution context tags.
//!
//! Each thread carries a small set of [`ContextTag`]s describing its role.
//! Tags live in thread-local storage, so lookups take no lock. An untagged
//! thread simply answers `false`.

use super::model::ContextTag;
use std::cell::Cell;

thread_local! {
    static TAGS: Cell<u8> = const { Cell::new(0) };
}

/// Handle to the per-thread tag store.
///
/// Zero-sized; policies hold one so the lookup is injected rather than
/// reached for implicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextRegistry;

impl ContextRegistry {
    pub const fn new() -> Self {
        ContextRegistry
    }

    /// Tags the calling thread. Idempotent.
    #[inline]
    pub fn mark_as(&self, tag: ContextTag) {
        TAGS.with(|tags| tags.set(tags.get() | tag.bit()));
    }

    #[inline]
    pub fn current_has(&self, tag: ContextTag) -> bool {
        TAGS.with(|tags| tags.get() & tag.bit() != 0)
    }

    #[cfg(test)]
    fn unmark(&self, tag: ContextTag) {
        TAGS.with(|tags| tags.set(tags.get() & !tag.bit()));
    }
}
