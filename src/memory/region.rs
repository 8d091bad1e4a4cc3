// Tue Oct 13 2026 - Alex

use crate::memory::{Address, MemoryRange, Protection};
use std::fmt;

/// A mapped piece of the image. Bytes past `file_size` read as zero (`.bss`).
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    range: MemoryRange,
    protection: Protection,
    name: String,
    file_offset: u64,
    file_size: u64,
}

impl MemoryRegion {
    pub fn new(range: MemoryRange, protection: Protection, name: String) -> Self {
        Self {
            range,
            protection,
            name,
            file_offset: 0,
            file_size: range.size(),
        }
    }

    pub fn with_file_offset(mut self, offset: u64) -> Self {
        self.file_offset = offset;
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size.min(self.range.size());
        self
    }

    pub fn range(&self) -> &MemoryRange {
        &self.range
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn start(&self) -> Address {
        self.range.start()
    }

    pub fn end(&self) -> Address {
        self.range.end()
    }

    pub fn size(&self) -> u64 {
        self.range.size()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.range.contains(addr)
    }

    pub fn is_executable(&self) -> bool {
        self.protection.can_execute()
    }

    pub fn is_readable(&self) -> bool {
        self.protection.can_read()
    }

    pub fn is_data(&self) -> bool {
        !self.is_executable() && self.is_readable()
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {:#x}", self.range, self.protection, self.name, self.file_offset)
    }
}
