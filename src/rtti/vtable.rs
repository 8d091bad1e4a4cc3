// Wed Oct 14 2026 - Alex

use crate::config::AnalysisConfig;
use crate::memory::Address;
use crate::rtti::abi::TypeInfoVariant;
use crate::rtti::class::ClassTypeInfo;
use crate::rtti::error::{RttiError, RttiResult};
use crate::rtti::type_info::TypeInfoDecoder;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Largest offset-to-top magnitude taken seriously.
const MAX_OFFSET_TO_TOP: u64 = 1 << 28;

/// One virtual function slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum VtableSlot {
    /// Pointer into executable code
    Function(Address),
    /// The pure-virtual trap
    PureVirtual(Address),
    Null,
    /// A runtime stub with no body in the image (deleted-virtual trap)
    Unresolved(Address),
}

impl VtableSlot {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Null)
    }

    pub fn target(&self) -> Option<Address> {
        match self {
            Self::Function(a) | Self::PureVirtual(a) | Self::Unresolved(a) => Some(*a),
            Self::Null => None,
        }
    }
}

impl fmt::Display for VtableSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(a) => write!(f, "{:016x}", a.as_u64()),
            Self::PureVirtual(a) => write!(f, "{:016x} [pure]", a.as_u64()),
            Self::Null => write!(f, "null"),
            Self::Unresolved(a) => write!(f, "{:016x} [unresolved]", a.as_u64()),
        }
    }
}

/// A single (sub-object) vtable: `[offset_to_top][rtti][slots...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtableModel {
    /// Address of the offset-to-top word
    pub address: Address,
    /// Where object vptrs point: the first slot
    pub address_point: Address,
    /// type_info of the class this vtable was located for
    pub owning_type: Address,
    pub offset_to_top: i64,
    pub type_info_pointer: Address,
    pub slots: Vec<VtableSlot>,
}

impl VtableModel {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn usable_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_usable()).count()
    }

    pub fn has_pure_virtual(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, VtableSlot::PureVirtual(_)))
    }

    pub fn is_primary(&self) -> bool {
        self.offset_to_top == 0
    }

    pub fn function_addresses(&self) -> Vec<Address> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                VtableSlot::Function(a) => Some(*a),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for VtableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "VTable @ {:016x} (offset_to_top {}, rtti {:016x})",
            self.address.as_u64(),
            self.offset_to_top,
            self.type_info_pointer.as_u64()
        )?;
        for (index, slot) in self.slots.iter().enumerate() {
            writeln!(f, "  [{}] {}", index, slot)?;
        }
        Ok(())
    }
}

/// Locates vtables through cross references to a class's type_info.
pub struct VtableDecoder {
    decoder: Arc<TypeInfoDecoder>,
    max_slots: usize,
    max_base_count: u32,
}

impl VtableDecoder {
    pub fn new(decoder: Arc<TypeInfoDecoder>, config: &AnalysisConfig) -> Self {
        Self {
            decoder,
            max_slots: config.max_vtable_slots,
            max_base_count: config.max_base_count,
        }
    }

    /// The primary vtable: the `_ZTV` object when the image names it, otherwise
    /// the lowest candidate with offset-to-top 0.
    pub fn locate(&self, class: &ClassTypeInfo) -> Option<VtableModel> {
        let candidates = self.locate_all(class);
        if let Some(header) = self.symbol_header(class) {
            if let Some(vt) = candidates.iter().find(|vt| vt.address == header) {
                return Some(vt.clone());
            }
        }
        candidates.into_iter().find(|vt| vt.is_primary())
    }

    /// Every sub-object vtable carrying the class's RTTI, ordered by address.
    pub fn locate_all(&self, class: &ClassTypeInfo) -> Vec<VtableModel> {
        let type_info = class.address();
        let ptr = self.decoder.pointer_size();
        let symbol = self.symbol_header(class);

        let mut refs = self.decoder.image().find_references_to(type_info);
        refs.sort();
        refs.dedup();

        let mut found = Vec::new();
        for rtti_slot in refs {
            let header = rtti_slot - ptr;
            if self.is_type_info_field(rtti_slot) {
                continue;
            }
            let model = match self.decode_at(header) {
                Ok(model) => model,
                Err(e) => {
                    log::trace!("vtable candidate {:#x} rejected: {}", header, e);
                    continue;
                }
            };
            if model.offset_to_top.unsigned_abs() > MAX_OFFSET_TO_TOP {
                continue;
            }
            if model.usable_slot_count() == 0 && symbol != Some(header) {
                continue;
            }
            found.push(VtableModel {
                owning_type: type_info,
                ..model
            });
        }
        log::debug!("{}: {} vtable candidates", class.display_name(), found.len());
        found
    }

    pub fn locate_sub_object(&self, class: &ClassTypeInfo, offset_to_top: i64) -> Option<VtableModel> {
        if offset_to_top == 0 {
            return self.locate(class);
        }
        self.locate_all(class)
            .into_iter()
            .find(|vt| vt.offset_to_top == offset_to_top)
    }

    /// Reads the vtable whose offset-to-top word is at `header`.
    pub fn decode_at(&self, header: Address) -> RttiResult<VtableModel> {
        let image = self.decoder.image();
        let ptr = self.decoder.pointer_size();
        let offset_to_top = image
            .read_signed(header)
            .map_err(|e| RttiError::memory(header, e))?;
        let type_info_pointer = image
            .read_pointer(header + ptr)
            .map_err(|e| RttiError::memory(header, e))?;
        if !self.decoder.is_type_info(type_info_pointer) {
            return Err(RttiError::invalid(header, "RTTI slot does not point at a type_info"));
        }
        let address_point = header + 2 * ptr;
        Ok(VtableModel {
            address: header,
            address_point,
            owning_type: type_info_pointer,
            offset_to_top,
            type_info_pointer,
            slots: self.walk_slots(address_point),
        })
    }

    pub fn validate(&self, model: &VtableModel) -> RttiResult<()> {
        let image = self.decoder.image();
        let ptr = self.decoder.pointer_size();

        let rtti = image
            .read_pointer(model.address_point - ptr)
            .map_err(|e| RttiError::memory(model.address, e))?;
        if rtti != model.type_info_pointer || rtti != model.owning_type {
            return Err(RttiError::invalid(
                model.address,
                format!("RTTI pointer {:#x} does not round-trip to {:#x}", rtti, model.owning_type),
            ));
        }
        self.decoder.decode(rtti)?;

        let slots = self.walk_slots(model.address_point);
        if slots != model.slots {
            return Err(RttiError::invalid(model.address, "slot walk differs from model"));
        }
        if model.usable_slot_count() == 0 {
            return Err(RttiError::invalid(model.address, "vtable has no usable slots"));
        }
        Ok(())
    }

    fn symbol_header(&self, class: &ClassTypeInfo) -> Option<Address> {
        let name = class.mangled_name();
        if name.is_empty() {
            return None;
        }
        self.decoder.image().resolve_symbol(&format!("_ZTV{}", name))
    }

    /// Forward walk from the address point. Stops at the first value that is
    /// not code, a trap or null; that includes the next vtable's RTTI pointer.
    fn walk_slots(&self, address_point: Address) -> Vec<VtableSlot> {
        let image = self.decoder.image();
        let abi = self.decoder.abi();
        let ptr = self.decoder.pointer_size();

        let mut slots = Vec::new();
        for index in 0..self.max_slots as u64 {
            let value = match image.read_pointer(address_point + index * ptr) {
                Ok(value) => value,
                Err(_) => break,
            };
            let slot = if value.is_null() {
                VtableSlot::Null
            } else if abi.is_pure_virtual(value) {
                VtableSlot::PureVirtual(value)
            } else if abi.is_deleted_virtual(value) {
                VtableSlot::Unresolved(value)
            } else if image.is_executable(value) || self.is_function_descriptor(value) {
                VtableSlot::Function(value)
            } else {
                break;
            };
            slots.push(slot);
        }
        while slots.last() == Some(&VtableSlot::Null) {
            slots.pop();
        }
        slots
    }

    /// ppc64 ELFv1 slots point at `.opd` descriptors whose first word is the entry.
    fn is_function_descriptor(&self, value: Address) -> bool {
        let image = self.decoder.image();
        if !image.uses_function_descriptors() || !image.is_mapped(value) {
            return false;
        }
        image
            .read_pointer(value)
            .map(|entry| image.is_executable(entry))
            .unwrap_or(false)
    }

    /// A reference to a type_info that is the base field of another type_info.
    fn is_type_info_field(&self, location: Address) -> bool {
        let ptr = self.decoder.pointer_size();
        if let Some(record) = location.checked_sub(2 * ptr) {
            if self.decoder.classify(record) == Some(TypeInfoVariant::SingleInheritance) {
                return true;
            }
        }
        let Some(first) = location.checked_sub(2 * ptr + 8) else {
            return false;
        };
        for index in 0..self.max_base_count as u64 {
            let Some(record) = first.checked_sub(index * 2 * ptr) else {
                break;
            };
            if self.decoder.classify(record) != Some(TypeInfoVariant::VirtualMultipleInheritance) {
                continue;
            }
            let count = self
                .decoder
                .image()
                .read_u32(record + 2 * ptr + 4)
                .unwrap_or(0) as u64;
            if index < count {
                return true;
            }
        }
        false
    }
}
