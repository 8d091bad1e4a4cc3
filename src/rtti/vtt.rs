// Wed Oct 14 2026 - Alex

use crate::config::AnalysisConfig;
use crate::memory::Address;
use crate::rtti::class::{ClassResolver, ClassTypeInfo};
use crate::rtti::error::RttiResult;
use crate::rtti::vtable::VtableModel;
use ahash::AHashMap;
use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Largest sub-object offset (or offset-to-top) taken seriously.
const MAX_SUB_OBJECT_OFFSET: u64 = 1 << 28;
const MAX_LAYOUT_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VttEntry {
    /// Location of the entry inside the VTT
    pub address: Address,
    /// Sub-vtable address point stored in the entry
    pub target: Address,
    /// Offset-to-top word in front of `target`
    pub offset_to_top: i64,
    /// type_info stored in front of `target`
    pub serviced_type: Address,
    /// Base sub-object the entry's vtable is installed into
    pub sub_object: Option<Address>,
}

/// Virtual table table of a class with virtual bases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VttModel {
    pub address: Address,
    pub owning_type: Address,
    pub entries: Vec<VttEntry>,
}

impl VttModel {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for VttModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VTT @ {:016x} ({} entries)", self.address.as_u64(), self.entries.len())?;
        for (index, entry) in self.entries.iter().enumerate() {
            write!(
                f,
                "  [{}] {:016x} -> {:016x} ({})",
                index,
                entry.target.as_u64(),
                entry.serviced_type.as_u64(),
                entry.offset_to_top
            )?;
            match entry.sub_object {
                Some(sub) => writeln!(f, " in {:016x}", sub.as_u64())?,
                None => writeln!(f, " unmapped")?,
            }
        }
        Ok(())
    }
}

/// Sub-objects of one class, `(offset inside it, type_info)`, the class itself first.
type SubObjectLayout = Vec<(i64, Address)>;

pub struct VttDecoder {
    resolver: Arc<ClassResolver>,
    max_entries: usize,
}

impl VttDecoder {
    pub fn new(resolver: Arc<ClassResolver>, config: &AnalysisConfig) -> Self {
        Self {
            resolver,
            max_entries: config.max_vtt_entries,
        }
    }

    /// Finds the VTT of a class with virtual bases. `Ok(None)` when the class has
    /// none or no candidate holds a single entry. A returned model may still fail
    /// [`VttDecoder::is_valid`].
    pub fn locate(&self, class: &ClassTypeInfo, primary: &VtableModel) -> RttiResult<Option<VttModel>> {
        if self.resolver.virtual_parent_addresses(class.address())?.is_empty() {
            return Ok(None);
        }
        let ancestors = self.resolver.ancestors(class.address())?;

        let image = self.resolver.decoder().image();
        let ptr = self.resolver.decoder().pointer_size();
        let symbol_name = format!("_ZTT{}", class.mangled_name());
        let symbol = if class.mangled_name().is_empty() {
            None
        } else {
            image.resolve_symbol(&symbol_name)
        };

        let (starts, limit) = match symbol {
            Some(sym) => {
                let limit = image
                    .symbol_size(&symbol_name)
                    .map(|size| (size / ptr) as usize)
                    .filter(|count| *count > 0)
                    .map_or(self.max_entries, |count| count.min(self.max_entries));
                (vec![sym], limit)
            }
            None => {
                let mut refs: Vec<Address> = image
                    .find_references_to(primary.address_point)
                    .into_iter()
                    .filter(|r| image.is_mapped(*r) && !image.is_executable(*r))
                    .collect();
                refs.sort();
                refs.dedup();
                (refs, self.max_entries)
            }
        };

        let mut fallback = None;
        for start in starts {
            let entries = self.read_entries(class, primary, &ancestors, start, limit);
            if entries.is_empty() {
                continue;
            }
            let model = VttModel {
                address: start,
                owning_type: class.address(),
                entries,
            };
            if self.is_valid(&model) {
                log::debug!("{}: VTT @ {:#x}, {} entries", class.display_name(), start, model.len());
                return Ok(Some(model));
            }
            fallback.get_or_insert(model);
        }
        Ok(fallback)
    }

    /// Entry 0 constructs the owning class itself. Every entry must be mapped to a
    /// base sub-object of the owner, and the vtable it installs must carry the RTTI
    /// of that sub-object or of a class containing it.
    pub fn is_valid(&self, model: &VttModel) -> bool {
        let Some(first) = model.entries.first() else {
            return false;
        };
        if first.sub_object != Some(model.owning_type) {
            return false;
        }
        let ancestors = match self.resolver.ancestors(model.owning_type) {
            Ok(ancestors) => ancestors,
            Err(_) => return false,
        };
        let related = |t: Address| t == model.owning_type || ancestors.contains(&t);
        model.entries.iter().all(|entry| {
            let Some(sub_object) = entry.sub_object else {
                return false;
            };
            related(entry.serviced_type)
                && related(sub_object)
                && (sub_object == entry.serviced_type || self.derives_from(entry.serviced_type, sub_object))
        })
    }

    /// Reads entries until one is not an address point, services a class outside
    /// the owner's hierarchy, or `limit` is reached.
    fn read_entries(
        &self,
        owner: &ClassTypeInfo,
        primary: &VtableModel,
        ancestors: &IndexSet<Address>,
        start: Address,
        limit: usize,
    ) -> Vec<VttEntry> {
        let image = self.resolver.decoder().image();
        let ptr = self.resolver.decoder().pointer_size();

        let mut anchors: AHashMap<Address, Address> = AHashMap::new();
        anchors.insert(owner.address(), primary.address_point);
        let mut layouts: AHashMap<Address, SubObjectLayout> = AHashMap::new();

        let mut entries = Vec::new();
        for index in 0..limit as u64 {
            let location = start + index * ptr;
            let Ok(target) = image.read_pointer(location) else {
                break;
            };
            let Some((serviced_type, offset_to_top)) = self.address_point_header(target) else {
                break;
            };
            if serviced_type != owner.address() && !ancestors.contains(&serviced_type) {
                log::trace!("VTT @ {:#x} ends at entry {}: unrelated type {:#x}", start, index, serviced_type);
                break;
            }
            if offset_to_top == 0 {
                anchors.entry(serviced_type).or_insert(target);
            }
            let layout = layouts
                .entry(serviced_type)
                .or_insert_with(|| self.sub_object_layout(serviced_type, anchors.get(&serviced_type).copied()));
            let sub_object = layout
                .iter()
                .find(|(offset, _)| *offset == offset_to_top.wrapping_neg())
                .map(|(_, class)| *class);
            entries.push(VttEntry {
                address: location,
                target,
                offset_to_top,
                serviced_type,
                sub_object,
            });
        }
        entries
    }

    /// `(type_info, offset_to_top)` in front of `target`, if it is an address point.
    fn address_point_header(&self, target: Address) -> Option<(Address, i64)> {
        let decoder = self.resolver.decoder();
        let ptr = decoder.pointer_size();
        let image = decoder.image();
        if target.is_null() || image.is_executable(target) {
            return None;
        }
        let offset_to_top = image.read_signed(target.checked_sub(2 * ptr)?).ok()?;
        if offset_to_top.unsigned_abs() > MAX_SUB_OBJECT_OFFSET {
            return None;
        }
        let rtti = image.read_pointer(target - ptr).ok()?;
        decoder.is_type_info(rtti).then_some((rtti, offset_to_top))
    }

    /// Base sub-objects of `class`. Virtual base offsets are read from the
    /// vbase-offset words in front of `anchor`, the class's own address point, so
    /// only classes sharing that vtable (offset 0) contribute virtual bases.
    fn sub_object_layout(&self, class: Address, anchor: Option<Address>) -> SubObjectLayout {
        let mut layout = Vec::new();
        self.collect_sub_objects(class, 0, anchor, 0, &mut layout);
        layout
    }

    fn collect_sub_objects(
        &self,
        class: Address,
        offset: i64,
        anchor: Option<Address>,
        depth: usize,
        layout: &mut SubObjectLayout,
    ) {
        if depth > MAX_LAYOUT_DEPTH || layout.contains(&(offset, class)) {
            return;
        }
        layout.push((offset, class));
        let Ok(node) = self.resolver.resolve(class) else {
            return;
        };
        let image = self.resolver.decoder().image();
        for parent in node.parents() {
            if !parent.is_virtual {
                self.collect_sub_objects(parent.address, offset + parent.offset, anchor, depth + 1, layout);
                continue;
            }
            let Some(anchor) = anchor.filter(|_| offset == 0) else {
                continue;
            };
            let Ok(position) = image.read_signed(anchor.offset(parent.offset)) else {
                continue;
            };
            if position.unsigned_abs() > MAX_SUB_OBJECT_OFFSET {
                continue;
            }
            self.collect_sub_objects(parent.address, position, Some(anchor), depth + 1, layout);
        }
    }

    fn derives_from(&self, derived: Address, base: Address) -> bool {
        self.resolver
            .ancestors(derived)
            .map(|ancestors| ancestors.contains(&base))
            .unwrap_or(false)
    }
}
