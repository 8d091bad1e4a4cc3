// Wed Oct 14 2026 - Alex

//! Synthetic images shaped like GCC output: type_info records and vtables in a
//! relro data section, names in rodata, the runtime's type_info vtables and
//! virtual traps bound in separate blocks.

use crate::config::AnalysisConfig;
use crate::memory::{Address, ImageBuilder, MemoryImage, MemoryWriter, Protection};
use crate::rtti::abi::{CLASS_TYPE_INFO_VTABLE, SI_CLASS_TYPE_INFO_VTABLE, VMI_CLASS_TYPE_INFO_VTABLE};
use crate::rtti::class::ClassResolver;
use crate::rtti::type_info::TypeInfoDecoder;
use std::sync::Arc;

const TEXT: u64 = 0x1000;
const TEXT_SIZE: u64 = 0x4000;
const RODATA: u64 = 0x10000;
const RODATA_SIZE: u64 = 0x8000;
const DATA: u64 = 0x20000;
const DATA_SIZE: u64 = 0x20000;
const EXTERN: u64 = 0x80000;
const EXTERN_SIZE: u64 = 0x100;
const OPD: u64 = 0x60000;
const OPD_SIZE: u64 = 0x1000;
const FUNCTION_SIZE: u64 = 0x10;

pub struct RttiImage {
    builder: ImageBuilder,
    ptr: u64,
    text_cursor: u64,
    rodata_cursor: u64,
    data_cursor: u64,
    opd_cursor: u64,
    class_vptr: Address,
    si_vptr: Address,
    vmi_vptr: Address,
    pure_virtual: Address,
    deleted_virtual: Address,
}

impl RttiImage {
    pub fn new() -> Self {
        Self::with_pointer_size(8)
    }

    pub fn with_pointer_size(pointer_size: usize) -> Self {
        Self::layout(ImageBuilder::new(pointer_size))
    }

    /// Big-endian ppc64 ELFv1: vtable slots hold `.opd` function descriptors.
    pub fn ppc64() -> Self {
        Self::layout(ImageBuilder::new(8).big_endian().function_descriptors())
    }

    fn layout(builder: ImageBuilder) -> Self {
        let ptr = builder.pointer_size() as u64;
        let builder = builder
            .section(".text", Address::new(TEXT), TEXT_SIZE, Protection::ReadExecute)
            .section(".rodata", Address::new(RODATA), RODATA_SIZE, Protection::Read)
            .section(".data.rel.ro", Address::new(DATA), DATA_SIZE, Protection::ReadWrite)
            .section("extern", Address::new(EXTERN), EXTERN_SIZE, Protection::Read)
            .section(".opd", Address::new(OPD), OPD_SIZE, Protection::ReadWrite)
            .symbol(CLASS_TYPE_INFO_VTABLE, Address::new(EXTERN))
            .symbol(SI_CLASS_TYPE_INFO_VTABLE, Address::new(EXTERN + 0x40))
            .symbol(VMI_CLASS_TYPE_INFO_VTABLE, Address::new(EXTERN + 0x80))
            .symbol("__cxa_pure_virtual", Address::new(TEXT))
            .symbol("__cxa_deleted_virtual", Address::new(TEXT + FUNCTION_SIZE));
        Self {
            builder,
            ptr,
            text_cursor: TEXT + 2 * FUNCTION_SIZE,
            rodata_cursor: RODATA,
            data_cursor: DATA,
            opd_cursor: OPD,
            class_vptr: Address::new(EXTERN + 2 * ptr),
            si_vptr: Address::new(EXTERN + 0x40 + 2 * ptr),
            vmi_vptr: Address::new(EXTERN + 0x80 + 2 * ptr),
            pure_virtual: Address::new(TEXT),
            deleted_virtual: Address::new(TEXT + FUNCTION_SIZE),
        }
    }

    pub fn pointer_size(&self) -> u64 {
        self.ptr
    }

    pub fn pure_virtual(&self) -> Address {
        self.pure_virtual
    }

    pub fn deleted_virtual(&self) -> Address {
        self.deleted_virtual
    }

    /// A fresh address in `.text`.
    pub fn function(&mut self) -> Address {
        let addr = Address::new(self.text_cursor);
        self.text_cursor += FUNCTION_SIZE;
        addr
    }

    /// A fresh `.opd` descriptor `[entry, toc, environment]` whose entry is a new function.
    pub fn descriptor(&mut self) -> Address {
        let at = Address::new(self.opd_cursor);
        self.opd_cursor += 3 * self.ptr;
        let entry = self.function();
        self.pointer(at, entry);
        self.pointer(at + self.ptr, Address::new(DATA));
        self.pointer(at + 2 * self.ptr, Address::zero());
        at
    }

    pub fn symbol(&mut self, name: &str, addr: Address) {
        self.builder.add_symbol(name, addr);
    }

    pub fn leaf(&mut self, mangled: &str) -> Address {
        let at = self.alloc(2 * self.ptr);
        self.header(at, self.class_vptr, mangled);
        at
    }

    pub fn single(&mut self, mangled: &str, base: Address) -> Address {
        let at = self.alloc(3 * self.ptr);
        self.header(at, self.si_vptr, mangled);
        self.pointer(at + 2 * self.ptr, base);
        at
    }

    /// SI record with a null base, patched later with [`RttiImage::set_single_base`].
    pub fn reserve_single(&mut self, mangled: &str) -> Address {
        self.single(mangled, Address::zero())
    }

    pub fn set_single_base(&mut self, record: Address, base: Address) {
        self.pointer(record + 2 * self.ptr, base);
    }

    /// VMI record; each base is `(type_info, virtual, offset)` and is marked public.
    pub fn vmi(&mut self, mangled: &str, flags: u32, bases: &[(Address, bool, i64)]) -> Address {
        let at = self.vmi_header(mangled, flags, bases.len() as u32, bases.len() as u64);
        let first = at + 2 * self.ptr + 8;
        for (index, (base, is_virtual, offset)) in bases.iter().enumerate() {
            let slot = first + index as u64 * 2 * self.ptr;
            let offset_flags = (offset << 8) | 0x2 | i64::from(*is_virtual);
            self.pointer(slot, *base);
            self.builder.write_signed(slot + self.ptr, offset_flags).unwrap();
        }
        at
    }

    /// VMI header claiming `count` bases with no descriptors behind it.
    pub fn vmi_with_count(&mut self, mangled: &str, count: u32) -> Address {
        self.vmi_header(mangled, 0, count, 0)
    }

    pub fn data_words(&mut self, words: &[u64]) -> Address {
        let at = self.alloc(words.len() as u64 * self.ptr);
        for (index, word) in words.iter().enumerate() {
            self.pointer(at + index as u64 * self.ptr, Address::new(*word));
        }
        at
    }

    /// Lays out `[offset_to_top][rtti][slots...]` per group back to back and
    /// returns the first group's header.
    pub fn vtable(&mut self, type_info: Address, groups: &[(i64, Vec<Address>)]) -> Address {
        self.vtable_with_vbase_offsets(type_info, &[], groups)
    }

    /// Same as [`RttiImage::vtable`] with vbase-offset words placed before the
    /// primary header; `prefix[0]` ends up directly in front of it.
    pub fn vtable_with_vbase_offsets(
        &mut self,
        type_info: Address,
        prefix: &[i64],
        groups: &[(i64, Vec<Address>)],
    ) -> Address {
        let words: u64 = groups.iter().map(|(_, slots)| 2 + slots.len() as u64).sum();
        let block = self.alloc((prefix.len() as u64 + words) * self.ptr);
        let start = block + prefix.len() as u64 * self.ptr;
        for (index, value) in prefix.iter().enumerate() {
            let at = start - (index as u64 + 1) * self.ptr;
            self.builder.write_signed(at, *value).unwrap();
        }
        let mut cursor = start;
        for (offset_to_top, slots) in groups {
            self.builder.write_signed(cursor, *offset_to_top).unwrap();
            self.pointer(cursor + self.ptr, type_info);
            cursor = cursor + 2 * self.ptr;
            for slot in slots {
                self.pointer(cursor, *slot);
                cursor = cursor + self.ptr;
            }
        }
        start
    }

    pub fn vtt(&mut self, mangled: Option<&str>, entries: &[Address]) -> Address {
        let at = self.alloc(entries.len() as u64 * self.ptr);
        for (index, entry) in entries.iter().enumerate() {
            self.pointer(at + index as u64 * self.ptr, *entry);
        }
        if let Some(name) = mangled {
            let size = entries.len() as u64 * self.ptr;
            self.builder.add_sized_symbol(&format!("_ZTT{}", name), at, size);
        }
        at
    }

    pub fn image(&self) -> Arc<MemoryImage> {
        Arc::new(self.builder.clone().build().unwrap())
    }

    pub fn decoder(&self) -> Arc<TypeInfoDecoder> {
        Arc::new(TypeInfoDecoder::new(self.image(), &AnalysisConfig::default()))
    }

    pub fn resolver(&self) -> ClassResolver {
        self.resolver_with(&AnalysisConfig::default())
    }

    pub fn resolver_with(&self, config: &AnalysisConfig) -> ClassResolver {
        let decoder = Arc::new(TypeInfoDecoder::new(self.image(), config));
        ClassResolver::new(decoder, config)
    }

    fn vmi_header(&mut self, mangled: &str, flags: u32, count: u32, descriptors: u64) -> Address {
        let at = self.alloc(2 * self.ptr + 8 + descriptors * 2 * self.ptr);
        self.header(at, self.vmi_vptr, mangled);
        self.builder.write_u32(at + 2 * self.ptr, flags).unwrap();
        self.builder.write_u32(at + 2 * self.ptr + 4, count).unwrap();
        at
    }

    fn header(&mut self, at: Address, vptr: Address, mangled: &str) {
        let name = self.name(mangled);
        self.pointer(at, vptr);
        self.pointer(at + self.ptr, name);
        self.symbol(&format!("_ZTI{}", mangled), at);
    }

    fn name(&mut self, mangled: &str) -> Address {
        let at = Address::new(self.rodata_cursor);
        let mut bytes = mangled.as_bytes().to_vec();
        bytes.push(0);
        self.builder.write_bytes(at, &bytes).unwrap();
        self.rodata_cursor = (self.rodata_cursor + bytes.len() as u64 + 7) & !7;
        at
    }

    fn alloc(&mut self, size: u64) -> Address {
        let at = Address::new(self.data_cursor);
        self.data_cursor = (self.data_cursor + size + self.ptr - 1) & !(self.ptr - 1);
        at
    }

    fn pointer(&mut self, at: Address, value: Address) {
        self.builder.write_pointer(at, value).unwrap();
    }
}
