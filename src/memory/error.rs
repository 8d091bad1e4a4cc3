// Tue Oct 13 2026 - Alex

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Read failed at address {0:#x}")]
    ReadFailed(u64),
    #[error("Binary parse error: {0}")]
    BinaryParseError(String),
    #[error("Out of bounds: address {0:#x} not in image")]
    OutOfBounds(u64),
    #[error("Unsupported pointer size: {0}")]
    UnsupportedPointerSize(usize),
    #[error("String at {0:#x} is not terminated within {1} bytes")]
    UnterminatedString(u64, usize),
}
