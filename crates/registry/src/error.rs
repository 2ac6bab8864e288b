//! Registry errors

use keel_types::Address;
use thiserror::Error;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Validator not found: {0}")]
    NotFound(Address),

    #[error("Validator already registered: {0}")]
    AlreadyRegistered(Address),

    #[error("Insufficient stake: {stake} < {min}")]
    InsufficientStake { stake: u64, min: u64 },

    #[error("Validator {address} cannot be reactivated: {reason}")]
    CannotReactivate { address: Address, reason: &'static str },
}
