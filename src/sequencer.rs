//! Transaction sequence number allocation.
//!
//! Sequence numbers identify an open transaction to the client that began
//! it. They are handed out from a single monotonic counter shared by every
//! worker, wrapping from `i32::MAX` back to `1` — `0` is reserved to mean
//! "no transaction" and is never allocated.

use std::sync::Mutex;

/// Hands out transaction sequence numbers, one at a time, under a mutex.
pub struct Sequencer {
    next: Mutex<u32>,
}

impl Default for Sequencer {
    fn default() -> Self { Self::new() }
}

impl Sequencer {
    #[must_use]
    pub const fn new() -> Self { Self { next: Mutex::new(1) } }

    /// Allocate the next sequence number. Recovers from a poisoned mutex
    /// rather than panicking: a panic in one worker's critical section here
    /// must not take down every other worker's ability to start a
    /// transaction.
    #[must_use]
    pub fn next(&self) -> u32 {
        let mut guard = self.next.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let seq = *guard;
        *guard = if seq == i32::MAX as u32 { 1 } else { seq + 1 };
        seq
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::Sequencer;

    #[rstest]
    fn hands_out_increasing_numbers() {
        let seq = Sequencer::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.next(), 3);
    }

    #[rstest]
    fn never_hands_out_zero() {
        let seq = Sequencer::new();
        for _ in 0..1000 {
            assert_ne!(seq.next(), 0);
        }
    }

    #[rstest]
    fn wraps_from_i32_max_back_to_one() {
        let seq = Sequencer { next: std::sync::Mutex::new(i32::MAX as u32) };
        assert_eq!(seq.next(), i32::MAX as u32);
        assert_eq!(seq.next(), 1);
    }
}
