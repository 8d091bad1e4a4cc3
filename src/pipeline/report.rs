// Thu Oct 15 2026 - Alex

use crate::memory::Address;
use crate::pipeline::error::PipelineError;
use crate::rtti::{ParentLink, TypeInfoVariant, VtableModel, VttModel};
use crate::utils::format_duration;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedClass {
    pub address: Address,
    pub symbol: String,
    pub mangled_name: String,
    pub display_name: String,
    pub unique_name: String,
    pub variant: TypeInfoVariant,
    pub parents: Vec<ParentLink>,
    pub virtual_parents: Vec<Address>,
    pub is_abstract: bool,
    pub vtable: Option<VtableModel>,
    pub sub_object_vtables: Vec<VtableModel>,
    pub vtt: Option<VttModel>,
    /// A VTT was found but did not validate
    pub vtt_dropped: bool,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub address: Address,
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub symbols: usize,
    pub processed: usize,
    pub not_type_info: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub vtables: usize,
    pub vtts: usize,
    pub dropped_vtts: usize,
    pub abstract_classes: usize,
    pub elapsed_ms: u64,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchyReport {
    pub accepted: Vec<AcceptedClass>,
    pub rejected: Vec<Rejection>,
    pub stats: PipelineStats,
    pub cancelled: bool,
}

impl HierarchyReport {
    pub fn find(&self, address: Address) -> Option<&AcceptedClass> {
        self.accepted.iter().find(|c| c.address == address)
    }

    pub fn is_rejected(&self, address: Address) -> bool {
        self.rejected.iter().any(|r| r.address == address)
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        log::info!("report written to {}", path.as_ref().display());
        Ok(())
    }

    pub(crate) fn finalize(&mut self, elapsed: Duration) {
        self.accepted.sort_by_key(|c| c.address);
        self.rejected.sort_by_key(|r| r.address);
        let stats = &mut self.stats;
        stats.accepted = self.accepted.len();
        stats.rejected = self.rejected.len();
        stats.vtables = self.accepted.iter().filter(|c| c.vtable.is_some()).count();
        stats.vtts = self.accepted.iter().filter(|c| c.vtt.is_some()).count();
        stats.dropped_vtts = self.accepted.iter().filter(|c| c.vtt_dropped).count();
        stats.abstract_classes = self.accepted.iter().filter(|c| c.is_abstract).count();
        stats.elapsed_ms = elapsed.as_millis() as u64;
    }
}

impl fmt::Display for HierarchyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        write!(
            f,
            "{} classes accepted, {} rejected, {} skipped of {} symbols ({} vtables, {} VTTs, {} abstract) in {}",
            s.accepted,
            s.rejected,
            s.not_type_info,
            s.symbols,
            s.vtables,
            s.vtts,
            s.abstract_classes,
            format_duration(Duration::from_millis(s.elapsed_ms))
        )?;
        if self.cancelled {
            write!(f, " [cancelled]")?;
        }
        Ok(())
    }
}
