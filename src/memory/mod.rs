// Tue Oct 13 2026 - Alex

pub mod address;
pub mod elf;
pub mod error;
pub mod image;
pub mod protection;
pub mod range;
pub mod region;
pub mod traits;

pub use address::Address;
pub use elf::ElfImage;
pub use error::MemoryError;
pub use image::{ImageBuilder, MemoryImage};
pub use protection::Protection;
pub use range::MemoryRange;
pub use region::MemoryRegion;
pub use traits::{ImageAccessor, MemoryWriter, SymbolSource};
