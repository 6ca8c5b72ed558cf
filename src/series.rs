//! ==============================================================================
//! series.rs - fixed-capacity reading buffer
//! ==============================================================================
//!
//! purpose:
//!     caps memory and render cost. readings are kept in arrival order (never
//!     re-sorted by timestamp) and the oldest one is evicted once the buffer
//!     is full.
//!
//! relationships:
//!     - owned by: ingest.rs (the only writer)
//!     - read by: sink.rs, through `all()` snapshots
//!
//! ==============================================================================

use std::collections::VecDeque;

use crate::domain::Reading;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Clone, Debug)]
pub struct BoundedSeries {
    capacity: usize,
    readings: VecDeque<Reading>,
}

impl BoundedSeries {
    /// a capacity of zero is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// append `reading`; returns the evicted oldest entry if the buffer was full
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        self.readings.push_back(reading);
        if self.readings.len() > self.capacity {
            self.readings.pop_front()
        } else {
            None
        }
    }

    /// snapshot of the contents, oldest first
    pub fn all(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn average(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        let sum: f64 = self.readings.iter().map(Reading::temperature).sum();
        Some(sum / self.readings.len() as f64)
    }

    pub fn contains(&self, reading: &Reading) -> bool {
        // newest entries are the likeliest duplicates
        self.readings.iter().rev().any(|r| r == reading)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BoundedSeries {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
