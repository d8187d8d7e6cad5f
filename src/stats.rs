use std::ops::Add;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-run read accounting. Every worker owns one and the extractor merges
/// them field-wise at join time, so merging is associative and commutative.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinStats {
    /// Spots pulled from the cursor.
    pub spots_read: u64,
    /// Fragments seen, written or not.
    pub reads_read: u64,
    /// Fragments handed to a writer.
    pub reads_written: u64,
    /// Fragments with a declared length of zero.
    pub reads_zero_length: u64,
    /// Fragments below the minimum length.
    pub reads_too_short: u64,
    /// Technical fragments dropped by `skip_tech`.
    pub reads_technical: u64,
    /// Length-invariant violations (counted even when not fatal).
    pub reads_invalid: u64,
}

impl JoinStats {
    pub fn merge(&mut self, other: &JoinStats) {
        self.spots_read += other.spots_read;
        self.reads_read += other.reads_read;
        self.reads_written += other.reads_written;
        self.reads_zero_length += other.reads_zero_length;
        self.reads_too_short += other.reads_too_short;
        self.reads_technical += other.reads_technical;
        self.reads_invalid += other.reads_invalid;
    }
}

impl Add for JoinStats {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.merge(&other);
        self
    }
}

/// Cooperative cancellation shared by all workers of one run.
///
/// Polled at spot boundaries only, never mid-spot. Once set it stays set for
/// the life of the run.
#[derive(Debug, Default)]
pub struct QuitFlag(AtomicBool);

impl QuitFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
