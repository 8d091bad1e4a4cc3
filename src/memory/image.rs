// Wed Oct 14 2026 - Alex

use crate::memory::traits::encode_unsigned;
use crate::memory::{
    Address, ImageAccessor, MemoryError, MemoryRange, MemoryRegion, MemoryWriter, Protection,
    SymbolSource,
};
use ahash::AHashMap;
use once_cell::sync::OnceCell;

#[derive(Clone)]
struct Section {
    region: MemoryRegion,
    data: Vec<u8>,
}

impl Section {
    fn slice(&self, addr: Address, len: usize) -> Option<&[u8]> {
        if !self.region.range().contains_span(addr, len as u64) {
            return None;
        }
        let start = (addr.as_u64() - self.region.start().as_u64()) as usize;
        self.data.get(start..start + len)
    }

    fn slice_mut(&mut self, addr: Address, len: usize) -> Option<&mut [u8]> {
        if !self.region.range().contains_span(addr, len as u64) {
            return None;
        }
        let start = (addr.as_u64() - self.region.start().as_u64()) as usize;
        self.data.get_mut(start..start + len)
    }
}

/// Fully in-memory image: a set of sections plus a flat symbol list.
pub struct MemoryImage {
    pointer_size: usize,
    little_endian: bool,
    sections: Vec<Section>,
    symbols: Vec<(String, Address)>,
    by_name: AHashMap<String, Address>,
    sizes: AHashMap<String, u64>,
    function_descriptors: bool,
    xrefs: OnceCell<AHashMap<u64, Vec<Address>>>,
}

impl MemoryImage {
    fn section_for(&self, addr: Address) -> Option<&Section> {
        self.sections.iter().find(|s| s.region.contains(addr))
    }

    fn build_xref_index(&self) -> AHashMap<u64, Vec<Address>> {
        let mut index: AHashMap<u64, Vec<Address>> = AHashMap::new();
        let step = self.pointer_size;
        for section in self.sections.iter().filter(|s| s.region.is_readable()) {
            let base = section.region.start().as_u64();
            let mut offset = 0usize;
            while offset + step <= section.data.len() {
                let location = Address::new(base + offset as u64);
                if let Ok(value) = self.read_pointer(location) {
                    if !value.is_null() {
                        index.entry(value.as_u64()).or_default().push(location);
                    }
                }
                offset += step;
            }
        }
        log::debug!("xref index built: {} distinct targets", index.len());
        index
    }

    pub fn symbols(&self) -> &[(String, Address)] {
        &self.symbols
    }
}

impl ImageAccessor for MemoryImage {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        self.section_for(addr)
            .and_then(|s| s.slice(addr, len))
            .map(|bytes| bytes.to_vec())
            .ok_or(MemoryError::OutOfBounds(addr.as_u64()))
    }

    fn find_references_to(&self, target: Address) -> Vec<Address> {
        let index = self.xrefs.get_or_init(|| self.build_xref_index());
        index.get(&target.as_u64()).cloned().unwrap_or_default()
    }

    fn is_executable(&self, addr: Address) -> bool {
        self.section_for(addr).map(|s| s.region.is_executable()).unwrap_or(false)
    }

    fn is_mapped(&self, addr: Address) -> bool {
        self.section_for(addr).is_some()
    }

    fn resolve_symbol(&self, name: &str) -> Option<Address> {
        self.by_name.get(name).copied()
    }

    fn symbol_size(&self, name: &str) -> Option<u64> {
        self.sizes.get(name).copied()
    }

    fn uses_function_descriptors(&self) -> bool {
        self.function_descriptors
    }

    fn regions(&self) -> Vec<MemoryRegion> {
        self.sections.iter().map(|s| s.region.clone()).collect()
    }
}

impl SymbolSource for MemoryImage {
    fn symbols_with_prefix(&self, prefix: &str) -> Vec<(String, Address)> {
        self.symbols
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Lays out a [`MemoryImage`] section by section.
#[derive(Clone)]
pub struct ImageBuilder {
    pointer_size: usize,
    little_endian: bool,
    function_descriptors: bool,
    sections: Vec<Section>,
    symbols: Vec<(String, Address)>,
    sizes: Vec<(String, u64)>,
}

impl ImageBuilder {
    pub fn new(pointer_size: usize) -> Self {
        Self {
            pointer_size,
            little_endian: true,
            function_descriptors: false,
            sections: Vec::new(),
            symbols: Vec::new(),
            sizes: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.little_endian = false;
        self
    }

    /// Vtable slots hold descriptor addresses instead of code addresses.
    pub fn function_descriptors(mut self) -> Self {
        self.function_descriptors = true;
        self
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Adds a zero-filled section.
    pub fn section(mut self, name: &str, start: Address, size: u64, protection: Protection) -> Self {
        self.add_section(name, start, size, protection);
        self
    }

    pub fn add_section(&mut self, name: &str, start: Address, size: u64, protection: Protection) {
        let range = MemoryRange::from_start_size(start, size);
        let region = MemoryRegion::new(range, protection, name.to_string());
        self.sections.push(Section {
            region,
            data: vec![0u8; size as usize],
        });
    }

    pub fn symbol(mut self, name: &str, addr: Address) -> Self {
        self.add_symbol(name, addr);
        self
    }

    pub fn add_symbol(&mut self, name: &str, addr: Address) {
        self.symbols.push((name.to_string(), addr));
    }

    pub fn add_sized_symbol(&mut self, name: &str, addr: Address, size: u64) {
        self.add_symbol(name, addr);
        self.sizes.push((name.to_string(), size));
    }

    pub fn build(self) -> Result<MemoryImage, MemoryError> {
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(MemoryError::UnsupportedPointerSize(self.pointer_size));
        }
        for (i, a) in self.sections.iter().enumerate() {
            for b in &self.sections[i + 1..] {
                if a.region.range().overlaps(b.region.range()) {
                    return Err(MemoryError::InvalidAddress(format!(
                        "sections {} and {} overlap",
                        a.region.name(),
                        b.region.name()
                    )));
                }
            }
        }
        let mut by_name = AHashMap::new();
        for (name, addr) in &self.symbols {
            by_name.entry(name.clone()).or_insert(*addr);
        }
        let sizes = self.sizes.into_iter().collect();
        Ok(MemoryImage {
            pointer_size: self.pointer_size,
            little_endian: self.little_endian,
            sections: self.sections,
            symbols: self.symbols,
            by_name,
            sizes,
            function_descriptors: self.function_descriptors,
            xrefs: OnceCell::new(),
        })
    }

    fn section_mut(&mut self, addr: Address, len: usize) -> Result<&mut [u8], MemoryError> {
        self.sections
            .iter_mut()
            .find(|s| s.region.contains(addr))
            .and_then(|s| s.slice_mut(addr, len))
            .ok_or(MemoryError::OutOfBounds(addr.as_u64()))
    }
}

impl MemoryWriter for ImageBuilder {
    fn write_bytes(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryError> {
        self.section_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn write_u32(&mut self, addr: Address, value: u32) -> Result<(), MemoryError> {
        let bytes = encode_unsigned(value as u64, 4, self.little_endian);
        self.write_bytes(addr, &bytes)
    }

    fn write_pointer(&mut self, addr: Address, value: Address) -> Result<(), MemoryError> {
        let bytes = encode_unsigned(value.as_u64(), self.pointer_size, self.little_endian);
        self.write_bytes(addr, &bytes)
    }

    fn write_signed(&mut self, addr: Address, value: i64) -> Result<(), MemoryError> {
        let bytes = encode_unsigned(value as u64, self.pointer_size, self.little_endian);
        self.write_bytes(addr, &bytes)
    }
}
