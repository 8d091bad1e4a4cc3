// Thu Oct 15 2026 - Alex

use crate::memory::Address;
use crate::pipeline::report::AcceptedClass;
use crate::rtti::ClassResolver;
use serde::Serialize;
use std::fmt;

/// RTTI only distinguishes public from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseAccess {
    Public,
    NonPublic,
}

/// A base sub-object as seen by layout synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutBase {
    pub type_info: Address,
    pub name: String,
    /// Byte offset for non-virtual bases; vtable offset of the virtual-base offset
    /// slot for direct virtual bases; `None` for indirect virtual bases.
    pub offset: Option<i64>,
    pub is_virtual: bool,
    pub access: BaseAccess,
}

impl LayoutBase {
    pub fn new(type_info: Address, name: &str, offset: Option<i64>) -> Self {
        Self {
            type_info,
            name: name.to_string(),
            offset,
            is_virtual: false,
            access: BaseAccess::Public,
        }
    }

    pub fn with_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn with_access(mut self, access: BaseAccess) -> Self {
        self.access = access;
        self
    }
}

impl fmt::Display for LayoutBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            BaseAccess::Public => "public ",
            BaseAccess::NonPublic => "",
        };
        let virtual_kw = if self.is_virtual { "virtual " } else { "" };
        write!(f, "{}{}{}", virtual_kw, access, self.name)?;
        if let Some(offset) = self.offset {
            write!(f, " @ {:#x}", offset)?;
        }
        Ok(())
    }
}

/// Everything layout synthesis needs to know about one accepted class.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutRequest {
    pub class: Address,
    pub name: String,
    pub unique_name: String,
    /// Offset of the primary vptr, when the class has a vtable
    pub vptr_offset: Option<i64>,
    /// Direct non-virtual bases in declaration order
    pub bases: Vec<LayoutBase>,
    /// Every virtual base, direct or inherited
    pub virtual_bases: Vec<LayoutBase>,
    pub is_abstract: bool,
}

impl LayoutRequest {
    pub fn new(accepted: &AcceptedClass, resolver: &ClassResolver) -> Self {
        let name_of = |addr: Address| {
            resolver
                .unique_type_name(addr)
                .unwrap_or_else(|_| format!("{:#x}", addr))
        };

        let bases = accepted
            .parents
            .iter()
            .filter(|p| !p.is_virtual)
            .map(|p| {
                let access = if p.is_public { BaseAccess::Public } else { BaseAccess::NonPublic };
                LayoutBase::new(p.address, &name_of(p.address), Some(p.offset)).with_access(access)
            })
            .collect();

        let virtual_bases = accepted
            .virtual_parents
            .iter()
            .map(|addr| {
                let direct = accepted.parents.iter().find(|p| p.address == *addr && p.is_virtual);
                let access = match direct {
                    Some(p) if !p.is_public => BaseAccess::NonPublic,
                    _ => BaseAccess::Public,
                };
                LayoutBase::new(*addr, &name_of(*addr), direct.map(|p| p.offset))
                    .with_virtual()
                    .with_access(access)
            })
            .collect();

        Self {
            class: accepted.address,
            name: accepted.display_name.clone(),
            unique_name: accepted.unique_name.clone(),
            vptr_offset: accepted.vtable.as_ref().map(|_| 0),
            bases,
            virtual_bases,
            is_abstract: accepted.is_abstract,
        }
    }
}

impl fmt::Display for LayoutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abstract_kw = if self.is_abstract { "abstract " } else { "" };
        write!(f, "{}class {}", abstract_kw, self.name)?;
        let all: Vec<String> = self
            .bases
            .iter()
            .chain(self.virtual_bases.iter())
            .map(|b| b.to_string())
            .collect();
        if !all.is_empty() {
            write!(f, " : {}", all.join(", "))?;
        }
        Ok(())
    }
}
