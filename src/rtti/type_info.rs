// Tue Oct 13 2026 - Alex

use crate::config::AnalysisConfig;
use crate::memory::{Address, ImageAccessor};
use crate::rtti::abi::{AbiSymbols, TypeInfoVariant};
use crate::rtti::error::{RttiError, RttiResult};
use bitflags::bitflags;
use cpp_demangle::{DemangleOptions, Symbol};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// `__base_class_type_info::__offset_flags` low bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BaseFlags: u8 {
        const VIRTUAL = 0x1;
        const PUBLIC = 0x2;
    }
}

bitflags! {
    /// `__vmi_class_type_info::__flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VmiFlags: u32 {
        const NON_DIAMOND_REPEAT = 0x1;
        const DIAMOND_SHAPED = 0x2;
    }
}

const OFFSET_SHIFT: u32 = 8;

/// A base pointer as read from the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BaseRef {
    Resolved { address: Address },
    Unresolved { raw: Address, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseDescriptor {
    pub base: BaseRef,
    pub flags: BaseFlags,
    /// Byte offset of a non-virtual base, or the vtable offset of the virtual-base
    /// offset slot for a virtual base.
    pub offset: i64,
}

impl BaseDescriptor {
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(BaseFlags::VIRTUAL)
    }

    pub fn is_public(&self) -> bool {
        self.flags.contains(BaseFlags::PUBLIC)
    }

    pub fn address(&self) -> Option<Address> {
        match &self.base {
            BaseRef::Resolved { address } => Some(*address),
            BaseRef::Unresolved { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfoRecord {
    pub address: Address,
    pub variant: TypeInfoVariant,
    pub name_address: Address,
    pub mangled_name: Option<String>,
    pub vmi_flags: VmiFlags,
    pub bases: Vec<BaseDescriptor>,
}

impl TypeInfoRecord {
    pub fn name(&self) -> &str {
        self.mangled_name.as_deref().unwrap_or("")
    }

    pub fn display_name(&self) -> String {
        match self.mangled_name.as_deref() {
            Some(name) => demangle_class_name(name).unwrap_or_else(|| name.to_string()),
            None => format!("<type_info@{:#x}>", self.address),
        }
    }

    pub fn base_count(&self) -> usize {
        self.bases.len()
    }
}

impl fmt::Display for TypeInfoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {:#x} ({} bases)",
            self.variant.as_str(),
            self.display_name(),
            self.address,
            self.bases.len()
        )
    }
}

/// Readable form of a type_info name string. The name is a bare `<type>`
/// production, so it goes to the demangler without the `_Z` prefix.
pub fn demangle_class_name(mangled: &str) -> Option<String> {
    if mangled.is_empty() {
        return None;
    }
    Symbol::new(mangled)
        .ok()
        .and_then(|symbol| symbol.demangle(&DemangleOptions::default()).ok())
}

/// Recognises and parses class `type_info` records. Pure reads only.
pub struct TypeInfoDecoder {
    image: Arc<dyn ImageAccessor>,
    abi: AbiSymbols,
    max_base_count: u32,
    max_name_length: usize,
}

impl TypeInfoDecoder {
    pub fn new(image: Arc<dyn ImageAccessor>, config: &AnalysisConfig) -> Self {
        let abi = AbiSymbols::resolve(image.as_ref(), config);
        Self {
            image,
            abi,
            max_base_count: config.max_base_count,
            max_name_length: config.max_name_length,
        }
    }

    pub fn image(&self) -> &Arc<dyn ImageAccessor> {
        &self.image
    }

    pub fn abi(&self) -> &AbiSymbols {
        &self.abi
    }

    pub fn pointer_size(&self) -> u64 {
        self.image.pointer_size() as u64
    }

    /// Cheap check: does the vptr at `address` name one of the class layouts.
    pub fn classify(&self, address: Address) -> Option<TypeInfoVariant> {
        if address.is_null() {
            return None;
        }
        self.image
            .read_pointer(address)
            .ok()
            .and_then(|vptr| self.abi.classify_vptr(vptr))
    }

    pub fn is_type_info(&self, address: Address) -> bool {
        self.classify(address).is_some()
    }

    pub fn decode(&self, address: Address) -> RttiResult<TypeInfoRecord> {
        let variant = self
            .classify(address)
            .ok_or(RttiError::NotTypeInfo { address })?;
        let ptr = self.pointer_size();

        let name_address = self
            .image
            .read_pointer(address + ptr)
            .map_err(|e| RttiError::memory(address, e))?;
        let mangled_name = match self.image.read_c_string(name_address, self.max_name_length) {
            Ok(name) if !name.is_empty() => Some(name),
            Ok(_) => None,
            Err(e) => {
                log::debug!("type_info {:#x}: name unreadable: {}", address, e);
                None
            }
        };

        let mut record = TypeInfoRecord {
            address,
            variant,
            name_address,
            mangled_name,
            vmi_flags: VmiFlags::empty(),
            bases: Vec::new(),
        };

        match variant {
            TypeInfoVariant::Leaf => {}
            TypeInfoVariant::SingleInheritance => {
                let raw = self
                    .image
                    .read_pointer(address + 2 * ptr)
                    .map_err(|e| RttiError::memory(address, e))?;
                record.bases.push(BaseDescriptor {
                    base: self.base_ref(raw),
                    flags: BaseFlags::PUBLIC,
                    offset: 0,
                });
            }
            TypeInfoVariant::VirtualMultipleInheritance => {
                self.decode_vmi(&mut record)?;
            }
        }

        log::trace!("decoded {}", record);
        Ok(record)
    }

    fn decode_vmi(&self, record: &mut TypeInfoRecord) -> RttiResult<()> {
        let address = record.address;
        let ptr = self.pointer_size();
        let flags_at = address + 2 * ptr;

        let flags = self
            .image
            .read_u32(flags_at)
            .map_err(|e| RttiError::memory(address, e))?;
        let count = self
            .image
            .read_u32(flags_at + 4)
            .map_err(|e| RttiError::memory(address, e))?;
        if count > self.max_base_count {
            return Err(RttiError::invalid(
                address,
                format!("base count {} exceeds limit {}", count, self.max_base_count),
            ));
        }
        record.vmi_flags = VmiFlags::from_bits_truncate(flags);

        let first = flags_at + 8;
        for index in 0..count as u64 {
            let slot = first + index * 2 * ptr;
            let descriptor = match (self.image.read_pointer(slot), self.image.read_signed(slot + ptr)) {
                (Ok(raw), Ok(offset_flags)) => BaseDescriptor {
                    base: self.base_ref(raw),
                    flags: BaseFlags::from_bits_truncate((offset_flags & 0x3) as u8),
                    offset: offset_flags >> OFFSET_SHIFT,
                },
                (raw, _) => BaseDescriptor {
                    base: BaseRef::Unresolved {
                        raw: raw.unwrap_or_default(),
                        reason: format!("descriptor {} at {:#x} unreadable", index, slot),
                    },
                    flags: BaseFlags::empty(),
                    offset: 0,
                },
            };
            record.bases.push(descriptor);
        }
        Ok(())
    }

    fn base_ref(&self, raw: Address) -> BaseRef {
        if raw.is_null() {
            return BaseRef::Unresolved {
                raw,
                reason: "null base pointer".to_string(),
            };
        }
        if !raw.is_aligned(4) || !self.image.is_mapped(raw) {
            return BaseRef::Unresolved {
                raw,
                reason: format!("base pointer {:#x} outside the image", raw),
            };
        }
        BaseRef::Resolved { address: raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtti::testing::RttiImage;

    #[test]
    fn test_decode_leaf_and_si() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.single("1B", a);
        let decoder = img.decoder();

        let rec_a = decoder.decode(a).unwrap();
        assert_eq!(rec_a.variant, TypeInfoVariant::Leaf);
        assert_eq!(rec_a.name(), "1A");
        assert!(rec_a.bases.is_empty());

        let rec_b = decoder.decode(b).unwrap();
        assert_eq!(rec_b.variant, TypeInfoVariant::SingleInheritance);
        assert_eq!(rec_b.bases.len(), 1);
        assert_eq!(rec_b.bases[0].address(), Some(a));
        assert!(rec_b.bases[0].is_public());
        assert!(!rec_b.bases[0].is_virtual());
    }

    #[test]
    fn test_decode_vmi_descriptors() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.leaf("1B");
        let c = img.vmi("1C", 2, &[(a, true, -24), (b, false, 8)]);
        let record = img.decoder().decode(c).unwrap();

        assert_eq!(record.variant, TypeInfoVariant::VirtualMultipleInheritance);
        assert!(record.vmi_flags.contains(VmiFlags::DIAMOND_SHAPED));
        assert_eq!(record.bases.len(), 2);
        assert!(record.bases[0].is_virtual());
        assert_eq!(record.bases[0].offset, -24);
        assert_eq!(record.bases[1].address(), Some(b));
        assert_eq!(record.bases[1].offset, 8);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.vmi("1B", 0, &[(a, false, 0)]);
        let decoder = img.decoder();
        assert_eq!(decoder.decode(b).unwrap(), decoder.decode(b).unwrap());
    }

    #[test]
    fn test_non_class_is_not_type_info() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let junk = img.data_words(&[0x1234, 0x5678]);
        let decoder = img.decoder();
        assert!(decoder.decode(junk).unwrap_err().is_not_type_info());
        assert!(decoder.decode(Address::new(0xdead_0000)).unwrap_err().is_not_type_info());
        assert!(decoder.decode(Address::zero()).unwrap_err().is_not_type_info());
        assert!(decoder.is_type_info(a));
    }

    #[test]
    fn test_corrupt_vmi_base_is_unresolved() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let c = img.vmi("1C", 0, &[(a, false, 0), (Address::new(0xdead_beef_0000), false, 16)]);
        let record = img.decoder().decode(c).unwrap();
        assert_eq!(record.bases.len(), 2);
        assert_eq!(record.bases[0].address(), Some(a));
        assert!(matches!(record.bases[1].base, BaseRef::Unresolved { .. }));
    }

    #[test]
    fn test_base_count_limit() {
        let mut img = RttiImage::new();
        let c = img.vmi_with_count("1C", 100_000);
        let err = img.decoder().decode(c).unwrap_err();
        assert!(matches!(err, RttiError::InvalidDataType { .. }));
    }

    #[test]
    fn test_decode_on_narrow_pointers() {
        let mut img = RttiImage::with_pointer_size(4);
        let a = img.leaf("1A");
        let b = img.vmi("1B", 0, &[(a, true, -12)]);
        let record = img.decoder().decode(b).unwrap();
        assert_eq!(record.bases[0].address(), Some(a));
        assert!(record.bases[0].is_virtual());
        assert_eq!(record.bases[0].offset, -12);
    }

    #[test]
    fn test_demangle_class_name() {
        assert_eq!(demangle_class_name("3Foo").as_deref(), Some("Foo"));
        assert_eq!(demangle_class_name("N3app6WidgetE").as_deref(), Some("app::Widget"));
        assert_eq!(demangle_class_name("St9exception").as_deref(), Some("std::exception"));
        assert_eq!(demangle_class_name("N3app3BoxIiEE").as_deref(), Some("app::Box<int>"));
        let vector = demangle_class_name("NSt3__16vectorIiNS_9allocatorIiEEEE").unwrap();
        assert!(vector.starts_with("std::__1::vector<int"));
        assert!(demangle_class_name("N12_GLOBAL__N_15LocalE").unwrap().ends_with("::Local"));
        assert_eq!(demangle_class_name(""), None);
        assert_eq!(demangle_class_name("not a type!"), None);
    }

    #[test]
    fn test_display_name_falls_back_to_raw() {
        let mut img = RttiImage::new();
        let a = img.leaf("St9exception");
        let b = img.leaf("3Foo$$");
        let decoder = img.decoder();
        assert_eq!(decoder.decode(a).unwrap().display_name(), "std::exception");
        assert_eq!(decoder.decode(b).unwrap().display_name(), "3Foo$$");
    }
}
