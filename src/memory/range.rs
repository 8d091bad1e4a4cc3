// Tue Oct 13 2026 - Alex

use crate::memory::Address;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRange {
    start: Address,
    end: Address,
}

impl MemoryRange {
    pub fn new(start: Address, end: Address) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    pub fn from_start_size(start: Address, size: u64) -> Self {
        Self::new(start, Address::new(start.as_u64().saturating_add(size)))
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end.as_u64()
    }

    /// True when `[addr, addr + len)` lies entirely inside the range.
    pub fn contains_span(&self, addr: Address, len: u64) -> bool {
        match addr.as_u64().checked_add(len) {
            Some(span_end) => self.contains(addr) && span_end <= self.end.as_u64(),
            None => false,
        }
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start.as_u64() < other.end.as_u64() && self.end.as_u64() > other.start.as_u64()
    }

    pub fn is_empty(&self) -> bool {
        self.start.as_u64() >= self.end.as_u64()
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
