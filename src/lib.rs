// Tue Oct 13 2026 - Alex

//! Class hierarchy recovery from Itanium C++ ABI RTTI.
//!
//! [`pipeline::HierarchyBuildPipeline`] walks every `_ZTI` symbol of an image,
//! decodes the class `type_info` records, resolves their inheritance graph,
//! locates vtables and VTTs, and reports the classes that hold up.

pub mod config;
pub mod memory;
pub mod pipeline;
pub mod rtti;
pub mod utils;

pub use config::{AnalysisConfig, UniqueNamePolicy};
pub use memory::{Address, ElfImage, ImageAccessor, MemoryImage, SymbolSource};
pub use pipeline::{CancellationToken, HierarchyBuildPipeline, HierarchyReport, PipelineError};
pub use rtti::{ClassResolver, ClassTypeInfo, RttiError, TypeInfoDecoder, VtableDecoder, VttDecoder};
