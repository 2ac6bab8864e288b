//! Consensus engine - drives one round from proposal to an irreversible decision
//!
//! A round captures the active-set snapshot at its start and counts every quorum against
//! that snapshot, even if the registry changes while votes are in flight.

use crate::error::ConsensusError;
use crate::gossip::VoteInbox;
use crate::proposer::{round_seed, select_proposer};
use crate::signer::VoteVerifier;
use crate::types::{
    ConsensusConfig, ConsensusDecision, ConsensusStats, Outcome, Proposal, ProposalFault, RejectReason,
    RoundOutcome, Vote, VotePhase,
};
use crate::votes::{InsertResult, VoteSet};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keel_registry::{ActiveSetSnapshot, Registry, SlashOutcome, SlashReason};
use keel_types::{Address, BatchId, Hash, Round, ZERO_HASH};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Everything fixed at the start of a round
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub round: Round,
    /// Active set the round counts quorums against
    pub snapshot: Arc<ActiveSetSnapshot>,
    pub seed: Hash,
    /// Selected proposer, `None` when the active set carries no weight
    pub proposer: Option<Address>,
}

impl RoundContext {
    pub fn prevote_threshold(&self, config: &ConsensusConfig) -> usize {
        self.snapshot
            .threshold(config.prevote_numerator, config.prevote_denominator)
            .max(1)
    }

    pub fn precommit_threshold(&self, config: &ConsensusConfig) -> usize {
        self.snapshot
            .threshold(config.precommit_numerator, config.precommit_denominator)
            .max(1)
    }
}

/// BFT finality engine
pub struct ConsensusEngine {
    registry: Arc<Registry>,
    verifier: Arc<dyn VoteVerifier>,
    config: ConsensusConfig,
    /// Decision per batch id; settled outcomes are never replaced
    decisions: DashMap<BatchId, ConsensusDecision>,
    /// Commitment of the last finalized batch, seeds the next proposer selection
    last_commitment: RwLock<Hash>,
    next_round: AtomicU64,
    stats: RwLock<ConsensusStats>,
}

impl ConsensusEngine {
    pub fn new(registry: Arc<Registry>, verifier: Arc<dyn VoteVerifier>, config: ConsensusConfig) -> Self {
        Self {
            registry,
            verifier,
            config,
            decisions: DashMap::new(),
            last_commitment: RwLock::new(ZERO_HASH),
            next_round: AtomicU64::new(1),
            stats: RwLock::new(ConsensusStats::default()),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Open the next round: snapshot the active set and select its proposer
    pub fn begin_round(&self) -> RoundContext {
        let round = self.next_round.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.registry.snapshot();
        let seed = round_seed(&self.last_commitment(), round);
        let proposer = select_proposer(&snapshot, &seed);
        self.stats.write().rounds_started += 1;

        tracing::debug!(
            "Round {} started: {} active validators, proposer {:?}",
            round,
            snapshot.len(),
            proposer
        );

        RoundContext {
            round,
            snapshot,
            seed,
            proposer,
        }
    }

    /// Collect votes for `proposal` until it finalizes, is rejected, or shutdown fires
    pub async fn run_round(
        &self,
        ctx: &RoundContext,
        proposal: &Proposal,
        inbox: &mut VoteInbox,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RoundOutcome {
        let active = ctx.snapshot.len();
        let mut decision = ConsensusDecision {
            round: ctx.round,
            proposer: proposal.proposer,
            batch_id: proposal.batch_id,
            prevotes: 0,
            precommits: 0,
            active_validators: active,
            outcome: Outcome::Pending,
        };

        if let Err(reason) = self.check_proposal(ctx, proposal) {
            return self.reject(decision, reason);
        }

        self.decisions.insert(proposal.batch_id, decision.clone());

        let prevote_needed = ctx.prevote_threshold(&self.config);
        let precommit_needed = ctx.precommit_threshold(&self.config);
        let timeout = self.config.phase_timeout();

        let mut votes = VoteSet::new(ctx.round);
        let mut phase = VotePhase::PreVote;
        let mut deadline = Instant::now() + timeout;
        let mut shutdown_open = true;
        let mut inbox_open = true;

        loop {
            tokio::select! {
                changed = shutdown.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => return self.cancel(decision),
                        Ok(()) => {}
                        Err(_) => shutdown_open = false,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return self.time_out(decision, phase);
                }
                vote = inbox.recv(), if inbox_open => {
                    let Some(vote) = vote else {
                        tracing::warn!("Vote inbox closed during round {}", ctx.round);
                        inbox_open = false;
                        continue;
                    };
                    if !self.admit(ctx, &vote) {
                        continue;
                    }

                    match votes.insert(vote) {
                        InsertResult::Inserted => {}
                        InsertResult::Conflict(existing) => {
                            self.stats.write().equivocations += 1;
                            tracing::warn!(
                                "Conflicting {:?} votes from {} in round {}",
                                existing.phase,
                                existing.voter,
                                ctx.round
                            );
                            if let Err(e) = self.slash(&existing.voter, SlashReason::ConflictingVotes, Some(ctx.round)) {
                                tracing::warn!("Could not slash equivocator {}: {}", existing.voter, e);
                            }
                        }
                        InsertResult::Duplicate | InsertResult::Ignored | InsertResult::WrongRound => continue,
                    }

                    let excluded = votes.faulty().count();
                    let prevotes = votes.tally(VotePhase::PreVote, proposal);
                    let precommits = votes.tally(VotePhase::PreCommit, proposal);
                    decision.prevotes = prevotes.accepts;
                    decision.precommits = precommits.accepts;

                    if phase == VotePhase::PreVote {
                        if prevotes.accepts >= prevote_needed {
                            tracing::debug!(
                                "Round {}: pre-vote quorum {}/{} reached",
                                ctx.round,
                                prevotes.accepts,
                                active
                            );
                            phase = VotePhase::PreCommit;
                            deadline = Instant::now() + timeout;
                        } else if active.saturating_sub(prevotes.rejects + excluded) < prevote_needed {
                            return self.reject(decision, RejectReason::VotedDown(VotePhase::PreVote));
                        }
                    }

                    if phase == VotePhase::PreCommit {
                        if precommits.accepts >= precommit_needed {
                            return self.finalize(decision, proposal);
                        }
                        if active.saturating_sub(precommits.rejects + excluded) < precommit_needed {
                            return self.reject(decision, RejectReason::VotedDown(VotePhase::PreCommit));
                        }
                    }
                }
            }
        }
    }

    /// Checks that need no votes: quorum possible, right proposer, intact content
    fn check_proposal(&self, ctx: &RoundContext, proposal: &Proposal) -> Result<(), RejectReason> {
        let active = ctx.snapshot.len();
        let required = self.config.min_validators.max(1);
        if active < required {
            return Err(RejectReason::InsufficientValidators { active, required });
        }

        if proposal.round != ctx.round {
            return Err(RejectReason::InvalidProposal(ProposalFault::WrongRound));
        }

        match ctx.proposer {
            Some(expected) if expected == proposal.proposer => {}
            Some(expected) => {
                return Err(RejectReason::WrongProposer {
                    expected,
                    got: proposal.proposer,
                })
            }
            None => return Err(RejectReason::InsufficientValidators { active, required }),
        }

        if let Err(fault) = proposal.verify() {
            if fault == ProposalFault::ProofOfOrderMismatch {
                if let Err(e) = self.slash(&proposal.proposer, SlashReason::InvalidProofOfOrder, Some(ctx.round)) {
                    tracing::warn!("Could not slash proposer {}: {}", proposal.proposer, e);
                }
            }
            return Err(RejectReason::InvalidProposal(fault));
        }

        if self.is_settled(proposal.batch_id) {
            return Err(RejectReason::AlreadyDecided);
        }
        Ok(())
    }

    fn admit(&self, ctx: &RoundContext, vote: &Vote) -> bool {
        if vote.round != ctx.round {
            tracing::trace!("Dropping vote for round {} during round {}", vote.round, ctx.round);
            return false;
        }
        if !ctx.snapshot.contains(&vote.voter) {
            tracing::debug!("Dropping vote from {} outside the round {} active set", vote.voter, ctx.round);
            return false;
        }
        if let Err(e) = self.check_vote(vote) {
            tracing::debug!("Dropping vote from {}: {}", vote.voter, e);
            return false;
        }
        if !self.verifier.verify(vote) {
            self.stats.write().invalid_signatures += 1;
            tracing::warn!("Invalid vote signature from {} in round {}", vote.voter, ctx.round);
            return false;
        }
        true
    }

    /// Refuse votes for a batch id that is already finalized
    pub fn check_vote(&self, vote: &Vote) -> Result<(), ConsensusError> {
        if self.is_finalized(vote.batch_id) {
            return Err(ConsensusError::AlreadyFinalized(vote.batch_id));
        }
        Ok(())
    }

    fn finalize(&self, mut decision: ConsensusDecision, proposal: &Proposal) -> RoundOutcome {
        decision.outcome = Outcome::Finalized;
        self.settle(decision.clone());
        *self.last_commitment.write() = proposal.content_hash;
        self.stats.write().finalized += 1;

        if let Err(e) = self.registry.record_proposed_round(&decision.proposer) {
            tracing::debug!("Proposer {} no longer registered: {}", decision.proposer, e);
        }

        tracing::info!(
            "Round {} finalized batch {} ({} pre-votes, {} pre-commits of {} active)",
            decision.round,
            decision.batch_id,
            decision.prevotes,
            decision.precommits,
            decision.active_validators
        );
        RoundOutcome::Finalized(decision)
    }

    fn reject(&self, mut decision: ConsensusDecision, reason: RejectReason) -> RoundOutcome {
        decision.outcome = Outcome::Rejected;
        if reason != RejectReason::AlreadyDecided {
            self.settle(decision.clone());
        }
        self.stats.write().rejected += 1;

        tracing::info!(
            "Round {} rejected batch {}: {:?}",
            decision.round,
            decision.batch_id,
            reason
        );
        RoundOutcome::Rejected { decision, reason }
    }

    fn time_out(&self, decision: ConsensusDecision, phase: VotePhase) -> RoundOutcome {
        self.stats.write().timeouts += 1;
        if let Err(e) = self.registry.record_missed_round(&decision.proposer) {
            tracing::debug!("Proposer {} no longer registered: {}", decision.proposer, e);
        }
        self.reject(decision, RejectReason::TimedOut(phase))
    }

    /// Drop the in-flight decision; nothing from a cancelled round is kept
    fn cancel(&self, decision: ConsensusDecision) -> RoundOutcome {
        self.decisions
            .remove_if(&decision.batch_id, |_, d| d.outcome == Outcome::Pending);
        self.stats.write().cancelled += 1;
        tracing::info!("Round {} cancelled by shutdown", decision.round);
        RoundOutcome::Cancelled { round: decision.round }
    }

    /// Store a decision unless one is already settled for the batch
    fn settle(&self, decision: ConsensusDecision) -> bool {
        match self.decisions.entry(decision.batch_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().outcome != Outcome::Pending {
                    return false;
                }
                entry.insert(decision);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(decision);
                true
            }
        }
    }

    /// Slash through the registry and count it
    pub fn slash(
        &self,
        address: &Address,
        reason: SlashReason,
        round: Option<Round>,
    ) -> Result<SlashOutcome, ConsensusError> {
        let outcome = self.registry.slash(address, reason, round)?;
        self.stats.write().slashes += 1;
        Ok(outcome)
    }

    pub fn decision(&self, batch_id: BatchId) -> Option<ConsensusDecision> {
        self.decisions.get(&batch_id).map(|d| d.clone())
    }

    pub fn is_finalized(&self, batch_id: BatchId) -> bool {
        self.decisions
            .get(&batch_id)
            .map(|d| d.outcome == Outcome::Finalized)
            .unwrap_or(false)
    }

    fn is_settled(&self, batch_id: BatchId) -> bool {
        self.decisions
            .get(&batch_id)
            .map(|d| d.outcome != Outcome::Pending)
            .unwrap_or(false)
    }

    pub fn last_commitment(&self) -> Hash {
        *self.last_commitment.read()
    }

    /// Last round handed out by `begin_round` (0 before the first)
    pub fn current_round(&self) -> Round {
        self.next_round.load(Ordering::SeqCst) - 1
    }

    pub fn stats(&self) -> ConsensusStats {
        self.stats.read().clone()
    }
}
