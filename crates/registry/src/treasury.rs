//! Treasury collaborator receiving the non-burned share of slashes

use crate::validator::SlashReason;
use keel_types::Address;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives the treasury share of every slash.
///
/// Token accounting lives outside the core; the registry only reports the credit.
pub trait Treasury: Send + Sync {
    fn credit(&self, amount: u64, from: Address, reason: SlashReason);
}

/// Treasury that only keeps a running balance
#[derive(Debug, Default)]
pub struct InMemoryTreasury {
    balance: AtomicU64,
}

impl InMemoryTreasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> u64 {
        self.balance.load(Ordering::SeqCst)
    }
}

impl Treasury for InMemoryTreasury {
    fn credit(&self, amount: u64, from: Address, reason: SlashReason) {
        self.balance.fetch_add(amount, Ordering::SeqCst);
        tracing::debug!("Treasury credited {} from {} ({})", amount, from, reason);
    }
}
