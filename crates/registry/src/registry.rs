//! The registry itself - single writer, concurrent readers

use crate::config::{RegistryConfig, BPS_DENOMINATOR};
use crate::error::RegistryError;
use crate::snapshot::ActiveSetSnapshot;
use crate::treasury::{InMemoryTreasury, Treasury};
use crate::validator::{DeactivationReason, SlashReason, SlashRecord, Validator};
use keel_types::{unix_millis, Address, Round, ValidatorEvent};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of a slash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashOutcome {
    pub address: Address,
    pub reason: SlashReason,
    /// Total stake removed
    pub amount: u64,
    pub burned: u64,
    pub to_treasury: u64,
    pub reputation_after: u32,
    /// Whether this slash pushed the validator out of the active set
    pub deactivated: bool,
}

/// Summary counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: usize,
    pub active: usize,
    pub total_stake: u64,
    pub total_slashed: u64,
}

struct RegistryState {
    validators: BTreeMap<Address, Validator>,
    /// `None` after any mutation; rebuilt on the next read
    active_cache: Option<Arc<ActiveSetSnapshot>>,
}

/// Authoritative validator set
pub struct Registry {
    state: RwLock<RegistryState>,
    config: RegistryConfig,
    treasury: Arc<dyn Treasury>,
    events: broadcast::Sender<ValidatorEvent>,
}

impl Registry {
    /// Create an empty registry with an in-memory treasury
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_treasury(config, Arc::new(InMemoryTreasury::new()))
    }

    pub fn with_treasury(config: RegistryConfig, treasury: Arc<dyn Treasury>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: RwLock::new(RegistryState {
                validators: BTreeMap::new(),
                active_cache: None,
            }),
            config,
            treasury,
            events,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to validator lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ValidatorEvent> {
        self.events.subscribe()
    }

    /// Register a new validator with the configured initial reputation.
    ///
    /// A validator whose initial reputation is already below the floor is recorded but
    /// starts inactive.
    pub fn register(&self, address: Address, stake: u64) -> Result<ValidatorEvent, RegistryError> {
        if stake < self.config.min_stake {
            return Err(RegistryError::InsufficientStake {
                stake,
                min: self.config.min_stake,
            });
        }

        let event = {
            let mut state = self.state.write();
            if state.validators.contains_key(&address) {
                return Err(RegistryError::AlreadyRegistered(address));
            }
            let mut validator = Validator::new(address, stake, self.config.initial_reputation);
            if let Some(reason) = validator.enforce_invariants(self.config.reputation_floor) {
                tracing::warn!("Validator {} registered inactive ({})", address, reason);
            }
            let event = event_for(&validator);
            state.validators.insert(address, validator);
            state.active_cache = None;
            event
        };

        tracing::info!("Validator registered: {} (stake: {})", address, stake);
        self.publish(event.clone());
        Ok(event)
    }

    /// Apply a signed stake change; the result is clamped at zero, which deactivates
    pub fn update_stake(&self, address: &Address, delta: i64) -> Result<ValidatorEvent, RegistryError> {
        self.mutate(address, |v| {
            let next = (v.stake as i128 + delta as i128).clamp(0, u64::MAX as i128);
            v.stake = next as u64;
        })
    }

    /// Apply a signed reputation change, bounded to `[0, MAX_REPUTATION]`
    pub fn adjust_reputation(&self, address: &Address, delta: i32) -> Result<ValidatorEvent, RegistryError> {
        self.mutate(address, |v| {
            v.reputation = bounded_reputation(v.reputation, delta);
        })
    }

    /// Remove a validator from the active set without deleting it
    pub fn deactivate(&self, address: &Address, reason: DeactivationReason) -> Result<ValidatorEvent, RegistryError> {
        let event = self.mutate(address, |v| {
            if v.active {
                v.active = false;
                v.deactivation_reason = Some(reason);
            }
        })?;
        tracing::info!("Validator deactivated: {} ({})", address, reason);
        Ok(event)
    }

    /// Bring a deactivated validator back, if its stake and reputation allow it.
    /// Jailed validators must go through [`Registry::unjail`].
    pub fn reactivate(&self, address: &Address) -> Result<ValidatorEvent, RegistryError> {
        let event = self.restore(address, false)?;
        tracing::info!("Validator reactivated: {}", address);
        Ok(event)
    }

    /// Release a jailed validator back into the active set. Stake and reputation rules of
    /// [`Registry::reactivate`] still apply.
    pub fn unjail(&self, address: &Address) -> Result<ValidatorEvent, RegistryError> {
        let event = self.restore(address, true)?;
        tracing::info!("Validator unjailed: {}", address);
        Ok(event)
    }

    fn restore(&self, address: &Address, unjail: bool) -> Result<ValidatorEvent, RegistryError> {
        let floor = self.config.reputation_floor;
        let event = {
            let mut state = self.state.write();
            let v = state
                .validators
                .get_mut(address)
                .ok_or(RegistryError::NotFound(*address))?;

            if v.is_jailed() != unjail {
                return Err(RegistryError::CannotReactivate {
                    address: *address,
                    reason: if unjail { "not jailed" } else { "jailed" },
                });
            }
            if v.stake == 0 {
                return Err(RegistryError::CannotReactivate {
                    address: *address,
                    reason: "no stake",
                });
            }
            if v.reputation < floor {
                return Err(RegistryError::CannotReactivate {
                    address: *address,
                    reason: "reputation below floor",
                });
            }

            v.active = true;
            v.deactivation_reason = None;
            let event = event_for(v);
            state.active_cache = None;
            event
        };

        self.publish(event.clone());
        Ok(event)
    }

    /// Slash a validator for provable misbehavior.
    ///
    /// Stake loses the configured fraction, reputation loses the configured penalty, and the
    /// floor check runs in the same write so the active flag is never stale.
    pub fn slash(
        &self,
        address: &Address,
        reason: SlashReason,
        round: Option<Round>,
    ) -> Result<SlashOutcome, RegistryError> {
        let policy = &self.config.slash;
        let floor = self.config.reputation_floor;

        let (outcome, event) = {
            let mut state = self.state.write();
            let v = state
                .validators
                .get_mut(address)
                .ok_or(RegistryError::NotFound(*address))?;

            let denominator = BPS_DENOMINATOR as u128;
            let amount = (v.stake as u128 * policy.stake_fraction() / denominator) as u64;
            let to_treasury = (amount as u128 * policy.treasury_share() / denominator) as u64;
            let burned = amount.saturating_sub(to_treasury);

            v.stake = v.stake.saturating_sub(amount);
            v.reputation = v.reputation.saturating_sub(policy.reputation_penalty);
            v.slash_history.push(SlashRecord {
                reason,
                amount,
                timestamp_ms: unix_millis(),
                round,
            });
            let deactivated = v.enforce_invariants(floor).is_some();

            let outcome = SlashOutcome {
                address: *address,
                reason,
                amount,
                burned,
                to_treasury,
                reputation_after: v.reputation,
                deactivated,
            };
            let event = event_for(v);
            state.active_cache = None;
            (outcome, event)
        };

        if outcome.to_treasury > 0 {
            self.treasury.credit(outcome.to_treasury, *address, reason);
        }

        tracing::warn!(
            "Validator slashed: {} (reason: {}, stake: -{}, burned: {}, reputation: {}{})",
            address,
            reason,
            outcome.amount,
            outcome.burned,
            outcome.reputation_after,
            if outcome.deactivated { ", deactivated" } else { "" }
        );

        self.publish(event);
        Ok(outcome)
    }

    /// Credit a proposer whose round finalized
    pub fn record_proposed_round(&self, address: &Address) -> Result<ValidatorEvent, RegistryError> {
        let reward = self.config.proposed_round_reward as i32;
        self.mutate(address, |v| {
            v.rounds_proposed += 1;
            v.reputation = bounded_reputation(v.reputation, reward);
        })
    }

    /// Penalize a proposer whose round was abandoned.
    ///
    /// Once missed rounds exceed `jail_missed_rounds` while uptime is below
    /// `jail_min_uptime`, the validator is jailed.
    pub fn record_missed_round(&self, address: &Address) -> Result<ValidatorEvent, RegistryError> {
        let penalty = self.config.missed_round_penalty as i32;
        let jail_after = self.config.jail_missed_rounds;
        let min_uptime = self.config.jail_min_uptime;
        let mut jailed = false;
        let event = self.mutate(address, |v| {
            v.rounds_missed += 1;
            v.reputation = bounded_reputation(v.reputation, -penalty);
            if v.active && v.rounds_missed > jail_after && v.uptime() < min_uptime {
                v.active = false;
                v.deactivation_reason = Some(DeactivationReason::Jailed);
                jailed = true;
            }
        })?;
        if jailed {
            tracing::warn!("Validator jailed: {} (excessive missed rounds)", address);
        } else {
            tracing::debug!("Missed round recorded for {} (reputation: {})", address, event.reputation);
        }
        Ok(event)
    }

    /// Snapshot of the active set; cached until the next mutation
    pub fn snapshot(&self) -> Arc<ActiveSetSnapshot> {
        if let Some(cached) = &self.state.read().active_cache {
            return cached.clone();
        }

        let state = self.state.upgradable_read();
        if let Some(cached) = &state.active_cache {
            return cached.clone();
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let snapshot = Arc::new(ActiveSetSnapshot::build(
            state.validators.values(),
            self.config.max_active_validators,
            self.config.max_per_entity,
            self.config.entity_prefix_len,
        ));
        state.active_cache = Some(snapshot.clone());
        snapshot
    }

    /// Active validators ordered by (stake, reputation) descending, per-entity cap applied
    pub fn active_set(&self) -> Vec<Validator> {
        let snapshot = self.snapshot();
        let state = self.state.read();
        snapshot
            .members()
            .iter()
            .filter_map(|m| state.validators.get(&m.address).cloned())
            .collect()
    }

    pub fn get(&self, address: &Address) -> Option<Validator> {
        self.state.read().validators.get(address).cloned()
    }

    pub fn is_active(&self, address: &Address) -> bool {
        self.state
            .read()
            .validators
            .get(address)
            .map(|v| v.active)
            .unwrap_or(false)
    }

    /// All validators, active or not, by address
    pub fn validators(&self) -> Vec<Validator> {
        self.state.read().validators.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().validators.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        let mut stats = RegistryStats {
            registered: state.validators.len(),
            ..Default::default()
        };
        for v in state.validators.values() {
            if v.active {
                stats.active += 1;
            }
            stats.total_stake += v.stake;
            stats.total_slashed += v.total_slashed();
        }
        stats
    }

    /// Apply `f` under the write lock, then re-check invariants, invalidate the cache and
    /// publish the resulting event
    fn mutate<F>(&self, address: &Address, f: F) -> Result<ValidatorEvent, RegistryError>
    where
        F: FnOnce(&mut Validator),
    {
        let floor = self.config.reputation_floor;
        let (event, deactivated) = {
            let mut state = self.state.write();
            let v = state
                .validators
                .get_mut(address)
                .ok_or(RegistryError::NotFound(*address))?;
            f(v);
            let deactivated = v.enforce_invariants(floor);
            let event = event_for(v);
            state.active_cache = None;
            (event, deactivated)
        };

        if let Some(reason) = deactivated {
            tracing::info!("Validator deactivated: {} ({})", address, reason);
        }
        self.publish(event.clone());
        Ok(event)
    }

    fn publish(&self, event: ValidatorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn bounded_reputation(current: u32, delta: i32) -> u32 {
    (current as i64 + delta as i64).clamp(0, crate::MAX_REPUTATION as i64) as u32
}

fn event_for(v: &Validator) -> ValidatorEvent {
    ValidatorEvent {
        address: v.address,
        stake: v.stake,
        reputation: v.reputation,
        active: v.active,
    }
}
