//! Validator Registry
//!
//! The single source of truth for validator stake, reputation and activity:
//! - writes are serialized behind one lock, reads of the active set run concurrently
//! - the ordered active set is cached and rebuilt lazily after any mutation
//! - rounds work from an immutable [`ActiveSetSnapshot`] taken at round start
//! - slashing is applied here and split between burn and a [`Treasury`] collaborator

pub mod config;
pub mod error;
pub mod registry;
pub mod snapshot;
pub mod treasury;
pub mod validator;

pub use config::{RegistryConfig, SlashPolicy};
pub use error::RegistryError;
pub use registry::{Registry, RegistryStats, SlashOutcome};
pub use snapshot::{ActiveMember, ActiveSetSnapshot};
pub use treasury::{InMemoryTreasury, Treasury};
pub use validator::{DeactivationReason, SlashReason, SlashRecord, Validator};

/// Upper bound of the reputation score
pub const MAX_REPUTATION: u32 = 100;
