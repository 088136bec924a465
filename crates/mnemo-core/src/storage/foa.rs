//! Focus-of-attention buffer: one bounded FIFO per session.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemo_adapters::{Memory, MemoryId};

/// Bounds applied on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoaLimits {
    pub max_tokens: usize,
    pub max_memories: usize,
    pub max_age: Duration,
}

/// Insertion-ordered buffer for one session.
#[derive(Debug, Default, Clone)]
pub struct FoaBuffer {
    entries: VecDeque<Memory>,
    tokens: usize,
}

fn older_than(memory: &Memory, max_age: Duration, now: DateTime<Utc>) -> bool {
    (now - memory.timestamp)
        .to_std()
        .is_ok_and(|age| age > max_age)
}

impl FoaBuffer {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &Memory> {
        self.entries.iter()
    }

    /// Replace an entry in place, keeping its position. Returns `false` if
    /// the id is not buffered.
    pub fn replace(&mut self, memory: Memory) -> bool {
        match self.entries.iter_mut().find(|m| m.id == memory.id) {
            Some(slot) => {
                self.tokens = self.tokens - slot.token_estimate() + memory.token_estimate();
                *slot = memory;
                true
            }
            None => false,
        }
    }

    /// Append a memory, then enforce the limits. Returns what was evicted.
    ///
    /// Aged entries go first, then the oldest entries until both the count
    /// and token budgets hold. The newest entry is always kept.
    pub fn push(&mut self, memory: Memory, limits: &FoaLimits, now: DateTime<Utc>) -> Vec<Memory> {
        self.tokens += memory.token_estimate();
        self.entries.push_back(memory);

        let mut evicted = self.evict_older_than(limits.max_age, now);
        while self.entries.len() > 1
            && (self.entries.len() > limits.max_memories || self.tokens > limits.max_tokens)
        {
            if let Some(oldest) = self.entries.pop_front() {
                self.tokens -= oldest.token_estimate();
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn remove(&mut self, id: &MemoryId) -> Option<Memory> {
        let idx = self.entries.iter().position(|m| &m.id == id)?;
        let removed = self.entries.remove(idx)?;
        self.tokens -= removed.token_estimate();
        Some(removed)
    }

    /// Drop entries older than `max_age`, except the newest one.
    pub fn evict_older_than(&mut self, max_age: Duration, now: DateTime<Utc>) -> Vec<Memory> {
        let newest = self.entries.back().map(|m| m.id.clone());
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for memory in self.entries.drain(..) {
            if older_than(&memory, max_age, now) && Some(&memory.id) != newest.as_ref() {
                evicted.push(memory);
            } else {
                kept.push_back(memory);
            }
        }
        self.entries = kept;
        self.tokens = self.entries.iter().map(Memory::token_estimate).sum();
        evicted
    }

    /// Drop every entry older than `max_age`, the newest included.
    pub fn purge_older_than(&mut self, max_age: Duration, now: DateTime<Utc>) -> Vec<Memory> {
        let (old, kept): (Vec<Memory>, Vec<Memory>) = self
            .entries
            .drain(..)
            .partition(|m| older_than(m, max_age, now));
        self.entries = kept.into();
        self.tokens = self.entries.iter().map(Memory::token_estimate).sum();
        old
    }
}
