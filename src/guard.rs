use std::sync::atomic::{AtomicBool, Ordering};

/// Scoped ownership of a boolean "busy" flag.
///
/// `acquire` flips the flag from `false` to `true` in one atomic step and
/// hands back a guard; dropping the guard clears the flag. Every exit path
/// (return, `?`, panic unwinding, a dropped future) therefore releases it
/// exactly once.
#[derive(Debug)]
pub struct ScopedFlag<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ScopedFlag<'a> {
    /// Returns `None` when the flag is already held.
    pub fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ScopedFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
