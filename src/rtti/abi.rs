// Tue Oct 13 2026 - Alex

use crate::config::AnalysisConfig;
use crate::memory::{Address, ImageAccessor};
use serde::Serialize;

pub const CLASS_TYPE_INFO_VTABLE: &str = "_ZTVN10__cxxabiv117__class_type_infoE";
pub const SI_CLASS_TYPE_INFO_VTABLE: &str = "_ZTVN10__cxxabiv120__si_class_type_infoE";
pub const VMI_CLASS_TYPE_INFO_VTABLE: &str = "_ZTVN10__cxxabiv121__vmi_class_type_infoE";

/// The three `type_info` layouts that describe classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeInfoVariant {
    /// `__class_type_info`: no bases.
    Leaf,
    /// `__si_class_type_info`: one public, non-virtual base at offset 0.
    SingleInheritance,
    /// `__vmi_class_type_info`: anything else.
    VirtualMultipleInheritance,
}

impl TypeInfoVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leaf => "class",
            Self::SingleInheritance => "si_class",
            Self::VirtualMultipleInheritance => "vmi_class",
        }
    }
}

/// Runtime-library addresses the decoders compare against.
#[derive(Debug, Clone, Default)]
pub struct AbiSymbols {
    dispatch: Vec<(Address, TypeInfoVariant)>,
    pure_virtual: Vec<Address>,
    deleted_virtual: Vec<Address>,
    pointer_size: u64,
}

impl AbiSymbols {
    pub fn resolve(image: &dyn ImageAccessor, config: &AnalysisConfig) -> Self {
        let mut dispatch = Vec::new();
        for (name, variant) in [
            (CLASS_TYPE_INFO_VTABLE, TypeInfoVariant::Leaf),
            (SI_CLASS_TYPE_INFO_VTABLE, TypeInfoVariant::SingleInheritance),
            (VMI_CLASS_TYPE_INFO_VTABLE, TypeInfoVariant::VirtualMultipleInheritance),
        ] {
            match image.resolve_symbol(name) {
                Some(addr) => dispatch.push((addr, variant)),
                None => log::debug!("{} not present in image", name),
            }
        }

        let lookup = |names: &[String]| -> Vec<Address> {
            names.iter().filter_map(|n| image.resolve_symbol(n)).collect()
        };

        let symbols = Self {
            dispatch,
            pure_virtual: lookup(&config.pure_virtual_symbols),
            deleted_virtual: lookup(&config.deleted_virtual_symbols),
            pointer_size: image.pointer_size() as u64,
        };
        if symbols.dispatch.is_empty() {
            log::warn!("No class type_info vtables resolved; image has no usable RTTI");
        }
        symbols
    }

    /// Matches a record's vptr. Records point at the address point (symbol plus
    /// two slots) but the bare symbol address is accepted as well.
    pub fn classify_vptr(&self, vptr: Address) -> Option<TypeInfoVariant> {
        let skip = 2 * self.pointer_size;
        self.dispatch
            .iter()
            .find(|(sym, _)| vptr == *sym + skip || vptr == *sym)
            .map(|(_, variant)| *variant)
    }

    pub fn is_pure_virtual(&self, addr: Address) -> bool {
        self.pure_virtual.contains(&addr)
    }

    pub fn is_deleted_virtual(&self, addr: Address) -> bool {
        self.deleted_virtual.contains(&addr)
    }

    pub fn has_type_info_tables(&self) -> bool {
        !self.dispatch.is_empty()
    }
}
