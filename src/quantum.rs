//! # Quantum Table
//!
//! Maps a priority level to the duration a thread of that priority may run
//! before the preemption timer fires. Built once by `init`, never mutated.

use std::time::Duration;

use crate::error::{Error, Result};

/// Immutable priority → quantum table. Index 0 is the first level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantumTable {
    quanta: Box<[Duration]>,
}

impl QuantumTable {
    /// Validate and build the table.
    ///
    /// Every quantum must be at least one microsecond, the resolution of the
    /// interval timer. An empty slice has no priority levels and is rejected.
    pub fn new(quanta: &[Duration]) -> Result<Self> {
        if quanta.is_empty() {
            return Err(Error::EmptyQuantumTable);
        }
        if let Some(priority) = quanta
            .iter()
            .position(|q| *q < Duration::from_micros(1))
        {
            return Err(Error::InvalidQuantum { priority });
        }
        Ok(Self {
            quanta: quanta.into(),
        })
    }

    /// Build a table from microsecond counts.
    #[cfg(test)]
    pub fn from_micros(usecs: &[u64]) -> Result<Self> {
        let quanta: Vec<Duration> = usecs.iter().copied().map(Duration::from_micros).collect();
        Self::new(&quanta)
    }

    /// Number of priority levels.
    #[inline]
    pub fn levels(&self) -> usize {
        self.quanta.len()
    }

    #[inline]
    pub fn is_valid(&self, priority: usize) -> bool {
        priority < self.quanta.len()
    }

    /// Check a priority index against the table.
    pub fn validate(&self, priority: usize) -> Result<()> {
        if self.is_valid(priority) {
            Ok(())
        } else {
            Err(Error::InvalidPriority(priority))
        }
    }

    /// Quantum for `priority`. Callers validate first.
    #[inline]
    pub fn quantum(&self, priority: usize) -> Duration {
        self.quanta[priority]
    }
}
