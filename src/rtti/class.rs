// Wed Oct 14 2026 - Alex

use crate::config::{AnalysisConfig, UniqueNamePolicy};
use crate::memory::Address;
use crate::rtti::abi::TypeInfoVariant;
use crate::rtti::cache::MemoCache;
use crate::rtti::error::{RttiError, RttiResult};
use crate::rtti::type_info::{BaseRef, TypeInfoDecoder, TypeInfoRecord};
use crate::rtti::vtable::VtableDecoder;
use crate::utils::hash::fnv1a_64;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A resolved direct base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentLink {
    /// type_info address of the base
    pub address: Address,
    pub is_virtual: bool,
    pub is_public: bool,
    pub offset: i64,
}

/// Class view of a decoded record. Parents are addresses into the resolver's
/// registry, never owning references.
#[derive(Debug, Clone)]
pub struct ClassTypeInfo {
    /// The decoded record
    record: TypeInfoRecord,
    /// Direct bases that decoded, in declaration order
    parents: Vec<ParentLink>,
    /// Why declared bases were dropped
    diagnostics: Vec<String>,
}

impl ClassTypeInfo {
    pub fn address(&self) -> Address {
        self.record.address
    }

    pub fn record(&self) -> &TypeInfoRecord {
        &self.record
    }

    pub fn variant(&self) -> TypeInfoVariant {
        self.record.variant
    }

    pub fn mangled_name(&self) -> &str {
        self.record.name()
    }

    pub fn display_name(&self) -> String {
        self.record.display_name()
    }

    pub fn parents(&self) -> &[ParentLink] {
        &self.parents
    }

    /// True when the record declares bases, resolvable or not.
    pub fn has_parent(&self) -> bool {
        !self.record.bases.is_empty()
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Names that collide across translation units.
    pub fn has_ambiguous_name(&self) -> bool {
        let name = self.mangled_name();
        name.is_empty() || name.contains("_GLOBAL__N") || name.starts_with('Z')
    }
}

impl fmt::Display for ClassTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())?;
        if !self.parents.is_empty() {
            let bases = self
                .parents
                .iter()
                .map(|p| {
                    let kw = if p.is_virtual { "virtual " } else { "" };
                    format!("{}{:#x}", kw, p.address)
                })
                .join(", ");
            write!(f, " : {}", bases)?;
        }
        Ok(())
    }
}

/// Address-keyed registry of resolved classes.
///
/// Decoding a node never recurses into another node's computation; every graph
/// walk (cycle check, virtual parents, unique names) runs over already-built
/// nodes with its own visited set, and name recursion only starts once the
/// graph above a class is known to be acyclic.
pub struct ClassResolver {
    decoder: Arc<TypeInfoDecoder>,
    vtables: Arc<VtableDecoder>,
    policy: UniqueNamePolicy,
    strict_bases: bool,
    nodes: MemoCache<Address, RttiResult<Arc<ClassTypeInfo>>>,
    acyclic: MemoCache<Address, RttiResult<()>>,
    virtual_parents: MemoCache<Address, RttiResult<Arc<IndexSet<Address>>>>,
    unique_names: MemoCache<Address, RttiResult<String>>,
    abstract_flags: MemoCache<Address, bool>,
}

impl ClassResolver {
    pub fn new(decoder: Arc<TypeInfoDecoder>, config: &AnalysisConfig) -> Self {
        let vtables = Arc::new(VtableDecoder::new(decoder.clone(), config));
        Self {
            decoder,
            vtables,
            policy: config.unique_name_policy,
            strict_bases: config.strict_bases,
            nodes: MemoCache::new(),
            acyclic: MemoCache::new(),
            virtual_parents: MemoCache::new(),
            unique_names: MemoCache::new(),
            abstract_flags: MemoCache::new(),
        }
    }

    pub fn decoder(&self) -> &Arc<TypeInfoDecoder> {
        &self.decoder
    }

    pub fn vtable_decoder(&self) -> &Arc<VtableDecoder> {
        &self.vtables
    }

    pub fn resolved_count(&self) -> usize {
        self.nodes.len()
    }

    /// Resolves the class at `address`. Idempotent; returns the same `Arc` every time.
    pub fn resolve(&self, address: Address) -> RttiResult<Arc<ClassTypeInfo>> {
        let node = self.node(address)?;
        self.check_acyclic(address)?;
        Ok(node)
    }

    pub fn parent_models(&self, address: Address) -> RttiResult<Vec<Arc<ClassTypeInfo>>> {
        let class = self.resolve(address)?;
        class.parents.iter().map(|p| self.resolve(p.address)).collect()
    }

    pub fn has_parent(&self, address: Address) -> RttiResult<bool> {
        Ok(self.resolve(address)?.has_parent())
    }

    pub fn diagnostics(&self, address: Address) -> RttiResult<Vec<String>> {
        Ok(self.resolve(address)?.diagnostics.clone())
    }

    /// Every base reached through a virtual edge on some path from `address`,
    /// first-reached order, each once.
    pub fn virtual_parent_addresses(&self, address: Address) -> RttiResult<Arc<IndexSet<Address>>> {
        self.resolve(address)?;
        self.virtual_parents
            .get_or_compute(address, || self.collect_virtual_parents(address).map(Arc::new))
    }

    pub fn virtual_parents(&self, address: Address) -> RttiResult<Vec<Arc<ClassTypeInfo>>> {
        self.virtual_parent_addresses(address)?
            .iter()
            .map(|addr| self.resolve(*addr))
            .collect()
    }

    /// Transitive bases, virtual or not, breadth first.
    pub fn ancestors(&self, address: Address) -> RttiResult<IndexSet<Address>> {
        let root = self.resolve(address)?;
        let mut seen = IndexSet::new();
        let mut queue: Vec<Arc<ClassTypeInfo>> = vec![root];
        while !queue.is_empty() {
            let mut next = Vec::new();
            for class in queue {
                for parent in &class.parents {
                    if seen.insert(parent.address) {
                        next.push(self.node(parent.address)?);
                    }
                }
            }
            queue = next;
        }
        Ok(seen)
    }

    /// True when any vtable of the class carries the pure-virtual trap.
    pub fn is_abstract(&self, address: Address) -> RttiResult<bool> {
        let class = self.resolve(address)?;
        Ok(self.abstract_flags.get_or_compute(address, || {
            self.vtables
                .locate_all(&class)
                .iter()
                .any(|vt| vt.has_pure_virtual())
        }))
    }

    /// Mangled name, extended with a parent fingerprint when the policy asks for one.
    pub fn unique_type_name(&self, address: Address) -> RttiResult<String> {
        let class = self.resolve(address)?;
        self.unique_names
            .get_or_compute(address, || self.compute_unique_name(&class))
    }

    /// Per-class acceptance check.
    pub fn validate(&self, address: Address) -> RttiResult<Arc<ClassTypeInfo>> {
        let class = self.resolve(address)?;
        if class.has_parent() && class.parents.is_empty() {
            return Err(RttiError::invalid(
                address,
                format!("none of {} declared bases resolve", class.record.bases.len()),
            ));
        }
        if !class.diagnostics.is_empty() {
            if self.strict_bases {
                return Err(RttiError::invalid(address, class.diagnostics.join("; ")));
            }
            for diag in &class.diagnostics {
                log::warn!("{}: {}", class.display_name(), diag);
            }
        }
        Ok(class)
    }

    fn node(&self, address: Address) -> RttiResult<Arc<ClassTypeInfo>> {
        self.nodes
            .get_or_compute(address, || self.build_node(address).map(Arc::new))
    }

    fn build_node(&self, address: Address) -> RttiResult<ClassTypeInfo> {
        let record = self.decoder.decode(address).map_err(|e| match e {
            RttiError::NotTypeInfo { address } => {
                RttiError::invalid(address, "not a class type_info")
            }
            other => other,
        })?;

        let mut parents = Vec::with_capacity(record.bases.len());
        let mut diagnostics = Vec::new();
        for (index, base) in record.bases.iter().enumerate() {
            match &base.base {
                BaseRef::Resolved { address: base_addr } => match self.decoder.decode(*base_addr) {
                    Ok(_) => parents.push(ParentLink {
                        address: *base_addr,
                        is_virtual: base.is_virtual(),
                        is_public: base.is_public(),
                        offset: base.offset,
                    }),
                    Err(e) => diagnostics.push(format!("base {} dropped: {}", index, e)),
                },
                BaseRef::Unresolved { reason, .. } => {
                    diagnostics.push(format!("base {} dropped: {}", index, reason))
                }
            }
        }

        log::debug!(
            "class {} @ {:#x}: {}/{} bases resolved",
            record.display_name(),
            address,
            parents.len(),
            record.bases.len()
        );
        Ok(ClassTypeInfo {
            record,
            parents,
            diagnostics,
        })
    }

    fn check_acyclic(&self, address: Address) -> RttiResult<()> {
        self.acyclic
            .get_or_compute(address, || self.find_cycle(address))
    }

    /// Iterative gray/black DFS over base edges.
    fn find_cycle(&self, root: Address) -> RttiResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Gray,
            Black,
        }

        let mut marks: HashMap<Address, Mark> = HashMap::new();
        let mut stack: Vec<(Arc<ClassTypeInfo>, usize)> = vec![(self.node(root)?, 0)];
        marks.insert(root, Mark::Gray);

        while let Some((class, next_parent)) = stack.last_mut() {
            let Some(parent) = class.parents.get(*next_parent).cloned() else {
                marks.insert(class.address(), Mark::Black);
                stack.pop();
                continue;
            };
            *next_parent += 1;
            match marks.get(&parent.address) {
                Some(Mark::Gray) => {
                    return Err(RttiError::invalid(
                        root,
                        format!("cyclic base chain through {:#x}", parent.address),
                    ));
                }
                Some(Mark::Black) => {}
                None => {
                    marks.insert(parent.address, Mark::Gray);
                    stack.push((self.node(parent.address)?, 0));
                }
            }
        }
        Ok(())
    }

    fn collect_virtual_parents(&self, root: Address) -> RttiResult<IndexSet<Address>> {
        let mut result = IndexSet::new();
        let mut visited: HashSet<(Address, bool)> = HashSet::new();
        let mut stack = vec![(root, false)];

        while let Some((address, via_virtual)) = stack.pop() {
            if !visited.insert((address, via_virtual)) {
                continue;
            }
            let class = self.node(address)?;
            // reversed so declaration order pops first
            for parent in class.parents.iter().rev() {
                let virtual_path = via_virtual || parent.is_virtual;
                stack.push((parent.address, virtual_path));
            }
            if via_virtual {
                result.insert(address);
            }
        }
        Ok(result)
    }

    fn compute_unique_name(&self, class: &ClassTypeInfo) -> RttiResult<String> {
        let base_name = match class.record.mangled_name.as_deref() {
            Some(name) => name.to_string(),
            None => "?".to_string(),
        };
        let wants_fingerprint = match self.policy {
            UniqueNamePolicy::MangledOnly => false,
            UniqueNamePolicy::Readable | UniqueNamePolicy::Hashed => class.has_ambiguous_name(),
            UniqueNamePolicy::AlwaysReadable => true,
        };
        if !wants_fingerprint || class.parents.is_empty() {
            return Ok(base_name);
        }

        let mut parts = Vec::with_capacity(class.parents.len());
        for parent in &class.parents {
            let name = self.unique_type_name(parent.address)?;
            parts.push(if parent.is_virtual {
                format!("virtual {}", name)
            } else {
                name
            });
        }
        let fingerprint = parts.iter().join(",");

        Ok(match self.policy {
            UniqueNamePolicy::Hashed => format!(
                "{}#{:016x}",
                base_name,
                fnv1a_64(fingerprint.as_bytes())
            ),
            _ => format!("{}{{{}}}", base_name, fingerprint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtti::testing::RttiImage;

    #[test]
    fn test_single_chain() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.single("1B", a);
        let c = img.single("1C", b);
        let resolver = img.resolver();

        let class_c = resolver.resolve(c).unwrap();
        let parents: Vec<Address> = resolver.parent_models(c).unwrap().iter().map(|p| p.address()).collect();
        assert_eq!(parents, vec![b]);
        assert_eq!(resolver.parent_models(b).unwrap()[0].address(), a);
        assert!(resolver.parent_models(a).unwrap().is_empty());
        assert!(resolver.virtual_parent_addresses(c).unwrap().is_empty());
        assert!(class_c.has_parent());
        assert!(!resolver.has_parent(a).unwrap());
        assert_eq!(resolver.ancestors(c).unwrap().into_iter().collect::<Vec<_>>(), vec![b, a]);
    }

    #[test]
    fn test_resolution_is_memoised() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.single("1B", a);
        let resolver = img.resolver();
        let first = resolver.resolve(b).unwrap();
        let second = resolver.resolve(b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.resolved_count(), 2);
    }

    #[test]
    fn test_virtual_diamond() {
        // D : B, C; B : virtual A; C : virtual A
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.vmi("1B", 0, &[(a, true, -24)]);
        let c = img.vmi("1C", 0, &[(a, true, -24)]);
        let d = img.vmi("1D", 2, &[(b, false, 0), (c, false, 8)]);
        let resolver = img.resolver();

        let vparents = resolver.virtual_parent_addresses(d).unwrap();
        assert_eq!(vparents.iter().copied().collect::<Vec<_>>(), vec![a]);
        assert_eq!(resolver.virtual_parents(d).unwrap()[0].mangled_name(), "1A");
    }

    #[test]
    fn test_virtual_bases_counted_once() {
        // D : virtual B, virtual C; B : A; C : A
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.single("1B", a);
        let c = img.single("1C", a);
        let d = img.vmi("1D", 1, &[(b, true, -24), (c, true, -32)]);
        let resolver = img.resolver();

        let vparents = resolver.virtual_parent_addresses(d).unwrap();
        assert_eq!(vparents.iter().copied().collect::<Vec<_>>(), vec![b, a, c]);
        let again = resolver.virtual_parent_addresses(d).unwrap();
        assert_eq!(vparents, again);
    }

    #[test]
    fn test_non_virtual_diamond_has_no_virtual_parents() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.single("1B", a);
        let c = img.single("1C", a);
        let d = img.vmi("1D", 1, &[(b, false, 0), (c, false, 8)]);
        let resolver = img.resolver();
        assert!(resolver.virtual_parent_addresses(d).unwrap().is_empty());
        assert_eq!(resolver.ancestors(d).unwrap().len(), 3);
    }

    #[test]
    fn test_virtual_parents_independent_of_query_order() {
        let build = || {
            let mut img = RttiImage::new();
            let a = img.leaf("1A");
            let b = img.vmi("1B", 0, &[(a, true, -24)]);
            let c = img.vmi("1C", 0, &[(b, false, 0), (a, true, -32)]);
            (img, a, b, c)
        };
        let (img1, _, b1, c1) = build();
        let r1 = img1.resolver();
        let first = r1.virtual_parent_addresses(c1).unwrap();
        r1.virtual_parent_addresses(b1).unwrap();

        let (img2, _, b2, c2) = build();
        let r2 = img2.resolver();
        r2.virtual_parent_addresses(b2).unwrap();
        let second = r2.virtual_parent_addresses(c2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cycle_is_invalid() {
        let mut img = RttiImage::new();
        let a = img.reserve_single("1A");
        let b = img.single("1B", a);
        img.set_single_base(a, b);
        let resolver = img.resolver();
        assert!(matches!(resolver.resolve(a), Err(RttiError::InvalidDataType { .. })));
        assert!(matches!(resolver.resolve(b), Err(RttiError::InvalidDataType { .. })));
        assert!(resolver.unique_type_name(b).is_err());
    }

    #[test]
    fn test_non_class_input_is_invalid() {
        let mut img = RttiImage::new();
        let junk = img.data_words(&[0x40, 0x50]);
        let resolver = img.resolver();
        assert!(matches!(resolver.resolve(junk), Err(RttiError::InvalidDataType { .. })));
    }

    #[test]
    fn test_unresolved_base_is_dropped_with_diagnostic() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let junk = img.data_words(&[0x40, 0x50]);
        let c = img.vmi("1C", 0, &[(a, false, 0), (junk, false, 8)]);
        let resolver = img.resolver();

        let class = resolver.validate(c).unwrap();
        assert_eq!(class.parents().len(), 1);
        assert_eq!(resolver.diagnostics(c).unwrap().len(), 1);
        assert!(class.has_parent());
    }

    #[test]
    fn test_no_resolvable_base_fails_validation() {
        let mut img = RttiImage::new();
        let c = img.vmi("1C", 0, &[(Address::new(0xdead_0000), false, 0)]);
        let resolver = img.resolver();
        assert!(resolver.resolve(c).is_ok());
        assert!(resolver.has_parent(c).unwrap());
        assert!(matches!(resolver.validate(c), Err(RttiError::InvalidDataType { .. })));
    }

    #[test]
    fn test_strict_bases_rejects_partial() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let c = img.vmi("1C", 0, &[(a, false, 0), (Address::new(0xdead_0000), false, 8)]);
        let config = AnalysisConfig::default().with_strict_bases(true);
        let resolver = img.resolver_with(&config);
        assert!(resolver.validate(c).is_err());
    }

    #[test]
    fn test_unique_name_plain_class() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.single("1B", a);
        let resolver = img.resolver();
        assert_eq!(resolver.unique_type_name(b).unwrap(), "1B");
        assert_eq!(resolver.unique_type_name(b).unwrap(), resolver.unique_type_name(b).unwrap());
    }

    #[test]
    fn test_unique_name_disambiguates_anonymous_namespace() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let x = img.leaf("1X");
        let first = img.single("N12_GLOBAL__N_16WidgetE", a);
        let second = img.single("N12_GLOBAL__N_16WidgetE", x);
        let resolver = img.resolver();

        let n1 = resolver.unique_type_name(first).unwrap();
        let n2 = resolver.unique_type_name(second).unwrap();
        assert_eq!(n1, "N12_GLOBAL__N_16WidgetE{1A}");
        assert_ne!(n1, n2);
    }

    #[test]
    fn test_unique_name_policies() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let local = img.vmi("Z4mainE5Local", 0, &[(a, true, -24)]);
        let plain = img.single("1P", a);

        let hashed = img.resolver_with(&AnalysisConfig::default().with_unique_name_policy(UniqueNamePolicy::Hashed));
        let name = hashed.unique_type_name(local).unwrap();
        assert!(name.starts_with("Z4mainE5Local#"));
        assert_eq!(name.len(), "Z4mainE5Local#".len() + 16);

        let readable = img.resolver();
        assert_eq!(readable.unique_type_name(local).unwrap(), "Z4mainE5Local{virtual 1A}");

        let mangled = img.resolver_with(&AnalysisConfig::default().with_unique_name_policy(UniqueNamePolicy::MangledOnly));
        assert_eq!(mangled.unique_type_name(local).unwrap(), "Z4mainE5Local");

        let always = img.resolver_with(&AnalysisConfig::default().with_unique_name_policy(UniqueNamePolicy::AlwaysReadable));
        assert_eq!(always.unique_type_name(plain).unwrap(), "1P{1A}");
    }

    #[test]
    fn test_is_abstract_from_pure_slot() {
        let mut img = RttiImage::new();
        let shape = img.leaf("5Shape");
        let circle = img.single("6Circle", shape);
        let pure = img.pure_virtual();
        let f1 = img.function();
        let f2 = img.function();
        img.vtable(shape, &[(0, vec![f1, pure])]);
        img.vtable(circle, &[(0, vec![f1, f2])]);
        let resolver = img.resolver();

        assert!(resolver.is_abstract(shape).unwrap());
        assert!(!resolver.is_abstract(circle).unwrap());
    }

    #[test]
    fn test_class_without_vtable_is_not_abstract() {
        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let resolver = img.resolver();
        assert!(!resolver.is_abstract(a).unwrap());
    }

    #[test]
    fn test_concurrent_resolution() {
        use rayon::prelude::*;

        let mut img = RttiImage::new();
        let a = img.leaf("1A");
        let b = img.vmi("1B", 0, &[(a, true, -24)]);
        let c = img.vmi("1C", 0, &[(a, true, -24)]);
        let d = img.vmi("1D", 2, &[(b, false, 0), (c, false, 8)]);
        let resolver = img.resolver();

        let names: Vec<String> = vec![d, c, b, a, d, b]
            .into_par_iter()
            .map(|addr| resolver.unique_type_name(addr).unwrap())
            .collect();
        assert_eq!(names[0], names[4]);
        assert_eq!(resolver.resolved_count(), 4);
    }
}
