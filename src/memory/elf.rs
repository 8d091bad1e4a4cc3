// Wed Oct 14 2026 - Alex

use crate::memory::traits::decode_unsigned;
use crate::memory::{
    Address, ImageAccessor, MemoryError, MemoryRange, MemoryRegion, Protection, SymbolSource,
};
use ahash::AHashMap;
use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_PPC64, EM_X86_64};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::reloc;
use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS};
use goblin::elf::Elf;
use memmap2::Mmap;
use once_cell::sync::OnceCell;
use std::fs::File;
use std::path::{Path, PathBuf};

const EXTERNAL_SLOT_SIZE: u64 = 0x10;

const R_PPC64_GLOB_DAT: u32 = 20;
const R_PPC64_RELATIVE: u32 = 22;
const R_PPC64_ADDR64: u32 = 38;

/// `e_flags` ABI field; 2 is ELFv2, which has no function descriptors.
const EF_PPC64_ABI: u32 = 0x3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelocKind {
    Relative,
    Absolute,
    Other,
}

fn classify_reloc(machine: u16, r_type: u32) -> RelocKind {
    match machine {
        EM_X86_64 => match r_type {
            reloc::R_X86_64_RELATIVE => RelocKind::Relative,
            reloc::R_X86_64_64 | reloc::R_X86_64_GLOB_DAT => RelocKind::Absolute,
            _ => RelocKind::Other,
        },
        EM_AARCH64 => match r_type {
            reloc::R_AARCH64_RELATIVE => RelocKind::Relative,
            reloc::R_AARCH64_ABS64 | reloc::R_AARCH64_GLOB_DAT => RelocKind::Absolute,
            _ => RelocKind::Other,
        },
        EM_386 => match r_type {
            reloc::R_386_RELATIVE => RelocKind::Relative,
            reloc::R_386_32 | reloc::R_386_GLOB_DAT => RelocKind::Absolute,
            _ => RelocKind::Other,
        },
        EM_ARM => match r_type {
            reloc::R_ARM_RELATIVE => RelocKind::Relative,
            reloc::R_ARM_ABS32 | reloc::R_ARM_GLOB_DAT => RelocKind::Absolute,
            _ => RelocKind::Other,
        },
        EM_PPC64 => match r_type {
            R_PPC64_RELATIVE => RelocKind::Relative,
            R_PPC64_ADDR64 | R_PPC64_GLOB_DAT => RelocKind::Absolute,
            _ => RelocKind::Other,
        },
        _ => RelocKind::Other,
    }
}

/// Value a relocation leaves at its target. `explicit` is the RELA addend; REL
/// entries carry theirs in the file bytes (`stored`).
fn relocated_value(kind: RelocKind, symbol: u64, explicit: Option<i64>, stored: Option<u64>) -> Option<u64> {
    match kind {
        // REL relative entries already hold the link-time address
        RelocKind::Relative => explicit.map(|addend| addend as u64),
        RelocKind::Absolute => {
            let addend = explicit.map(|a| a as u64).or(stored).unwrap_or(0);
            Some(symbol.wrapping_add(addend))
        }
        RelocKind::Other => None,
    }
}

/// Pointer-sized word at `vaddr` as stored in the file, read through the PT_LOAD mapping.
fn file_word(
    bytes: &[u8],
    segments: &[MemoryRegion],
    vaddr: u64,
    pointer_size: usize,
    little_endian: bool,
) -> Option<u64> {
    let segment = segments.iter().find(|s| s.contains(Address::new(vaddr)))?;
    let rel = vaddr - segment.start().as_u64();
    if rel + pointer_size as u64 > segment.file_size() {
        return None;
    }
    let start = (segment.file_offset() + rel) as usize;
    let word = bytes.get(start..start + pointer_size)?;
    decode_unsigned(word, little_endian).ok()
}

#[derive(Debug, Clone)]
struct ExternalSymbol {
    address: Address,
    is_function: bool,
}

/// Memory-mapped ELF image with dynamic relocations applied on read.
///
/// Imported symbols are bound to synthetic addresses in a block placed after the
/// highest loaded segment, so pointers to library objects (the ABI type_info
/// vtables, `__cxa_pure_virtual`) stay comparable.
pub struct ElfImage {
    mmap: Mmap,
    path: PathBuf,
    pointer_size: usize,
    little_endian: bool,
    function_descriptors: bool,
    segments: Vec<MemoryRegion>,
    sections: Vec<MemoryRegion>,
    data_sections: Vec<MemoryRange>,
    symbols: Vec<(String, Address)>,
    by_name: AHashMap<String, Address>,
    sizes: AHashMap<String, u64>,
    externals: AHashMap<String, ExternalSymbol>,
    external_range: MemoryRange,
    relocated: AHashMap<u64, u64>,
    xrefs: OnceCell<AHashMap<u64, Vec<Address>>>,
}

impl ElfImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MemoryError> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file) }?;
        let mut image = Self::parse(mmap)?;
        image.path = path.as_ref().to_path_buf();
        log::info!(
            "loaded {}: {} segments, {} symbols, {} relocated pointers",
            image.path.display(),
            image.segments.len(),
            image.symbols.len(),
            image.relocated.len()
        );
        Ok(image)
    }

    fn parse(mmap: Mmap) -> Result<Self, MemoryError> {
        let elf = Elf::parse(&mmap)
            .map_err(|e| MemoryError::BinaryParseError(format!("Failed to parse ELF: {}", e)))?;

        let pointer_size = if elf.is_64 { 8 } else { 4 };
        let little_endian = elf.little_endian;
        let machine = elf.header.e_machine;
        let function_descriptors = machine == EM_PPC64 && elf.header.e_flags & EF_PPC64_ABI != 2;

        let mut segments = Vec::new();
        let mut highest = 0u64;
        for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
            let range = MemoryRange::from_start_size(Address::new(ph.p_vaddr), ph.p_memsz);
            let region = MemoryRegion::new(range, Protection::from_elf_flags(ph.p_flags), "LOAD".to_string())
                .with_file_offset(ph.p_offset)
                .with_file_size(ph.p_filesz);
            highest = highest.max(range.end().as_u64());
            segments.push(region);
        }
        if segments.is_empty() {
            return Err(MemoryError::BinaryParseError("ELF has no loadable segments".to_string()));
        }

        let mut sections = Vec::new();
        let mut data_sections = Vec::new();
        for sh in elf.section_headers.iter().filter(|sh| sh.sh_addr != 0 && sh.sh_size != 0) {
            let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();
            let executable = sh.sh_flags & SHF_EXECINSTR as u64 != 0;
            let protection = if executable {
                Protection::ReadExecute
            } else {
                Protection::Read
            };
            let range = MemoryRange::from_start_size(Address::new(sh.sh_addr), sh.sh_size);
            // .rodata can share the R-X segment; only the section header tells data apart
            if !executable && sh.sh_type == SHT_PROGBITS && sh.sh_flags & SHF_ALLOC as u64 != 0 {
                data_sections.push(range);
            }
            sections.push(MemoryRegion::new(range, protection, name).with_file_offset(sh.sh_offset));
        }

        let mut symbols = Vec::new();
        let mut sizes = AHashMap::new();
        for (syms, strtab) in [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)] {
            for sym in syms.iter() {
                if sym.st_shndx == 0 || sym.st_value == 0 {
                    continue;
                }
                if let Some(name) = strtab.get_at(sym.st_name) {
                    if !name.is_empty() {
                        symbols.push((name.to_string(), Address::new(sym.st_value)));
                        if sym.st_size != 0 {
                            sizes.entry(name.to_string()).or_insert(sym.st_size);
                        }
                    }
                }
            }
        }
        let mut by_name = AHashMap::new();
        for (name, addr) in &symbols {
            by_name.entry(name.clone()).or_insert(*addr);
        }

        let external_start = (highest + 0xfff) & !0xfff;
        let mut next_external = external_start;
        let mut externals: AHashMap<String, ExternalSymbol> = AHashMap::new();
        let mut relocated = AHashMap::new();
        let width_mask = if pointer_size == 4 { u32::MAX as u64 } else { u64::MAX };

        for r in elf.dynrelas.iter().chain(elf.dynrels.iter()) {
            let kind = classify_reloc(machine, r.r_type);
            if kind == RelocKind::Other {
                continue;
            }
            let stored = match r.r_addend {
                Some(_) => None,
                None => file_word(&mmap, &segments, r.r_offset, pointer_size, little_endian),
            };
            let symbol = if kind == RelocKind::Absolute {
                let sym = match elf.dynsyms.get(r.r_sym) {
                    Some(sym) => sym,
                    None => continue,
                };
                if sym.st_shndx != 0 && sym.st_value != 0 {
                    sym.st_value
                } else {
                    let name = elf.dynstrtab.get_at(sym.st_name).unwrap_or("").to_string();
                    if name.is_empty() {
                        continue;
                    }
                    let is_function = sym.is_function();
                    let entry = externals.entry(name).or_insert_with(|| {
                        let address = Address::new(next_external);
                        next_external += EXTERNAL_SLOT_SIZE;
                        ExternalSymbol { address, is_function }
                    });
                    entry.is_function |= is_function;
                    entry.address.as_u64()
                }
            } else {
                0
            };
            if let Some(value) = relocated_value(kind, symbol, r.r_addend, stored) {
                relocated.insert(r.r_offset, value & width_mask);
            }
        }

        drop(elf);
        let external_range = MemoryRange::new(Address::new(external_start), Address::new(next_external));
        for (name, ext) in &externals {
            by_name.entry(name.clone()).or_insert(ext.address);
        }

        Ok(Self {
            mmap,
            path: PathBuf::new(),
            pointer_size,
            little_endian,
            function_descriptors,
            segments,
            sections,
            data_sections,
            symbols,
            by_name,
            sizes,
            externals,
            external_range,
            relocated,
            xrefs: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sections(&self) -> &[MemoryRegion] {
        &self.sections
    }

    fn segment_for(&self, addr: Address) -> Option<&MemoryRegion> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    fn external_at(&self, addr: Address) -> Option<&ExternalSymbol> {
        if !self.external_range.contains(addr) {
            return None;
        }
        self.externals.values().find(|ext| ext.address == addr)
    }

    fn build_xref_index(&self) -> AHashMap<u64, Vec<Address>> {
        let ranges: Vec<MemoryRange> = if self.data_sections.is_empty() {
            self.segments.iter().filter(|s| s.is_data()).map(|s| *s.range()).collect()
        } else {
            self.data_sections.clone()
        };

        let mut index: AHashMap<u64, Vec<Address>> = AHashMap::new();
        let step = self.pointer_size as u64;
        for range in ranges {
            let end = range.end().as_u64();
            let mut current = (range.start().as_u64() + step - 1) & !(step - 1);
            while current + step <= end {
                let location = Address::new(current);
                if let Ok(value) = self.read_pointer(location) {
                    if !value.is_null() {
                        index.entry(value.as_u64()).or_default().push(location);
                    }
                }
                current += step;
            }
        }
        for locations in index.values_mut() {
            locations.sort();
            locations.dedup();
        }
        log::debug!("{}: xref index holds {} targets", self.path.display(), index.len());
        index
    }
}

impl ImageAccessor for ElfImage {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        let segment = self
            .segment_for(addr)
            .ok_or(MemoryError::OutOfBounds(addr.as_u64()))?;
        if !segment.range().contains_span(addr, len as u64) {
            return Err(MemoryError::OutOfBounds(addr.as_u64()));
        }
        let rel = addr.as_u64() - segment.start().as_u64();
        let mut out = vec![0u8; len];
        // bytes past p_filesz are .bss and stay zero
        let file_len = segment.file_size().saturating_sub(rel).min(len as u64) as usize;
        if file_len > 0 {
            let start = (segment.file_offset() + rel) as usize;
            let bytes = self
                .mmap
                .get(start..start + file_len)
                .ok_or(MemoryError::ReadFailed(addr.as_u64()))?;
            out[..file_len].copy_from_slice(bytes);
        }
        Ok(out)
    }

    fn read_pointer(&self, addr: Address) -> Result<Address, MemoryError> {
        if let Some(value) = self.relocated.get(&addr.as_u64()) {
            return Ok(Address::new(*value));
        }
        let bytes = self.read_bytes(addr, self.pointer_size)?;
        decode_unsigned(&bytes, self.little_endian).map(Address::new)
    }

    fn find_references_to(&self, target: Address) -> Vec<Address> {
        let index = self.xrefs.get_or_init(|| self.build_xref_index());
        index.get(&target.as_u64()).cloned().unwrap_or_default()
    }

    fn is_executable(&self, addr: Address) -> bool {
        if let Some(ext) = self.external_at(addr) {
            return ext.is_function;
        }
        if !self.sections.is_empty() {
            return self
                .sections
                .iter()
                .find(|s| s.contains(addr))
                .map(|s| s.is_executable())
                .unwrap_or(false);
        }
        self.segment_for(addr).map(|s| s.is_executable()).unwrap_or(false)
    }

    fn is_mapped(&self, addr: Address) -> bool {
        self.segment_for(addr).is_some() || self.external_at(addr).is_some()
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
        self.segments.clone()
    }
}

impl SymbolSource for ElfImage {
    fn symbols_with_prefix(&self, prefix: &str) -> Vec<(String, Address)> {
        self.symbols
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .cloned()
            .collect()
    }
}
