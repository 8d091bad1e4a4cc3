// Tue Oct 13 2026 - Alex

use crate::memory::{Address, MemoryError};
use thiserror::Error;

/// Per-record failure. `Clone` so a failed resolution can be memoised like a good one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RttiError {
    #[error("No type_info record at {address}")]
    NotTypeInfo { address: Address },
    #[error("Invalid data type at {address}: {reason}")]
    InvalidDataType { address: Address, reason: String },
    #[error("Analysis cancelled")]
    Cancelled,
}

impl RttiError {
    pub fn invalid(address: Address, reason: impl Into<String>) -> Self {
        Self::InvalidDataType {
            address,
            reason: reason.into(),
        }
    }

    pub fn memory(address: Address, err: MemoryError) -> Self {
        Self::invalid(address, err.to_string())
    }

    pub fn is_not_type_info(&self) -> bool {
        matches!(self, Self::NotTypeInfo { .. })
    }
}

pub type RttiResult<T> = Result<T, RttiError>;
