//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Device id outside the fixed 1..=6 range
    #[error("device id out of range: {id} (expected 1..={max})")]
    DeviceOutOfRange { id: u32, max: u32 },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
