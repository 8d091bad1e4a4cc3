// Tue Oct 13 2026 - Alex

pub mod abi;
pub mod cache;
pub mod class;
pub mod error;
pub mod type_info;
pub mod vtable;
pub mod vtt;

#[cfg(test)]
pub(crate) mod testing;

pub use abi::{AbiSymbols, TypeInfoVariant};
pub use cache::MemoCache;
pub use class::{ClassResolver, ClassTypeInfo, ParentLink};
pub use error::{RttiError, RttiResult};
pub use type_info::{BaseDescriptor, BaseFlags, BaseRef, TypeInfoDecoder, TypeInfoRecord, VmiFlags};
pub use vtable::{VtableDecoder, VtableModel, VtableSlot};
pub use vtt::{VttDecoder, VttEntry, VttModel};
