// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consumer-side sequence bookkeeping.

/// How an incoming event relates to what was already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Next expected event. Process it.
    Fresh,
    /// Already seen. Drop it.
    Duplicate,
    /// Events are missing. Re-fetch full state before continuing.
    Gap { expected: u64, got: u64 },
}

/// Tracks the last sequence seen for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last: u64,
}

impl SequenceTracker {
    /// Resume after `last` (0 for a fresh subscriber).
    pub fn resume(last: u64) -> Self {
        Self { last }
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    /// Classify `sequence`. Only `Fresh` advances the tracker.
    pub fn observe(&mut self, sequence: u64) -> Delivery {
        if sequence <= self.last {
            Delivery::Duplicate
        } else if sequence == self.last + 1 {
            self.last = sequence;
            Delivery::Fresh
        } else {
            Delivery::Gap {
                expected: self.last + 1,
                got: sequence,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fresh_duplicate_and_gap() {
        let mut tracker = SequenceTracker::default();
        assert_eq!(tracker.observe(1), Delivery::Fresh);
        assert_eq!(tracker.observe(1), Delivery::Duplicate);
        assert_eq!(tracker.observe(3), Delivery::Gap { expected: 2, got: 3 });
        // A gap does not advance.
        assert_eq!(tracker.last(), 1);
        assert_eq!(tracker.observe(2), Delivery::Fresh);
        assert_eq!(tracker.observe(3), Delivery::Fresh);
    }

    #[test]
    fn resume_skips_seen_events() {
        let mut tracker = SequenceTracker::resume(4);
        assert_eq!(tracker.observe(4), Delivery::Duplicate);
        assert_eq!(tracker.observe(5), Delivery::Fresh);
    }
}
