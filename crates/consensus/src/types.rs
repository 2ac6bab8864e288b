//! Core types for proposals, votes and round decisions

use crate::error::ConsensusError;
use borsh::{BorshDeserialize, BorshSerialize};
use keel_types::{batch_commitment, proof_of_order, Address, BatchId, Hash, Round, StateRoot};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Voting phase within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum VotePhase {
    PreVote,
    PreCommit,
}

/// A batch put up for a vote in one round
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Proposal {
    pub round: Round,
    pub batch_id: BatchId,
    pub proposer: Address,
    /// Ordered transaction hashes of the batch
    pub tx_hashes: Vec<Hash>,
    /// Sequencer reference time (unix millis) the ordering measured ages against;
    /// replaying the ordering at this time reproduces `tx_hashes`
    pub reference_ms: u64,
    pub proof_of_order: Hash,
    pub state_root: StateRoot,
    /// Batch commitment over (batch id, proof of order, state root)
    pub content_hash: Hash,
}

/// What is wrong with a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalFault {
    WrongRound,
    ProofOfOrderMismatch,
    ContentHashMismatch,
}

impl Proposal {
    /// Build a proposal, deriving its proof of order and content hash
    pub fn new(
        round: Round,
        batch_id: BatchId,
        proposer: Address,
        tx_hashes: Vec<Hash>,
        reference_ms: u64,
        state_root: StateRoot,
    ) -> Self {
        let proof_of_order = proof_of_order(&tx_hashes);
        let content_hash = batch_commitment(batch_id, &proof_of_order, &state_root);
        Self {
            round,
            batch_id,
            proposer,
            tx_hashes,
            reference_ms,
            proof_of_order,
            state_root,
            content_hash,
        }
    }

    /// Recompute both commitments from the carried content
    pub fn verify(&self) -> Result<(), ProposalFault> {
        if proof_of_order(&self.tx_hashes) != self.proof_of_order {
            return Err(ProposalFault::ProofOfOrderMismatch);
        }
        if batch_commitment(self.batch_id, &self.proof_of_order, &self.state_root) != self.content_hash {
            return Err(ProposalFault::ContentHashMismatch);
        }
        Ok(())
    }
}

/// The signed part of a vote
#[derive(BorshSerialize)]
struct VotePayload {
    round: Round,
    batch_id: BatchId,
    phase: VotePhase,
    voter: Address,
    accept: bool,
    reference_ms: u64,
    proof_of_order: Hash,
    content_hash: Hash,
}

/// A single validator's opinion on a proposal in one phase
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Vote {
    pub round: Round,
    pub batch_id: BatchId,
    pub phase: VotePhase,
    pub voter: Address,
    pub accept: bool,
    /// Reference time of the proposal voted on
    pub reference_ms: u64,
    pub proof_of_order: Hash,
    pub content_hash: Hash,
    pub signature: Vec<u8>,
}

impl Vote {
    /// Unsigned vote on a proposal
    pub fn for_proposal(proposal: &Proposal, phase: VotePhase, voter: Address, accept: bool) -> Self {
        Self {
            round: proposal.round,
            batch_id: proposal.batch_id,
            phase,
            voter,
            accept,
            reference_ms: proposal.reference_ms,
            proof_of_order: proposal.proof_of_order,
            content_hash: proposal.content_hash,
            signature: Vec::new(),
        }
    }

    /// Canonical bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, ConsensusError> {
        let payload = VotePayload {
            round: self.round,
            batch_id: self.batch_id,
            phase: self.phase,
            voter: self.voter,
            accept: self.accept,
            reference_ms: self.reference_ms,
            proof_of_order: self.proof_of_order,
            content_hash: self.content_hash,
        };
        borsh::to_vec(&payload).map_err(|e| ConsensusError::Codec(e.to_string()))
    }

    /// Whether this vote is about exactly this proposal's content
    pub fn matches(&self, proposal: &Proposal) -> bool {
        self.batch_id == proposal.batch_id
            && self.reference_ms == proposal.reference_ms
            && self.proof_of_order == proposal.proof_of_order
            && self.content_hash == proposal.content_hash
    }

    /// Same voter, round and phase but a different statement
    pub fn conflicts_with(&self, other: &Vote) -> bool {
        self.voter == other.voter
            && self.round == other.round
            && self.phase == other.phase
            && (self.batch_id != other.batch_id
                || self.accept != other.accept
                || self.reference_ms != other.reference_ms
                || self.proof_of_order != other.proof_of_order
                || self.content_hash != other.content_hash)
    }
}

/// Message types exchanged between the round coordinator and validators
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    /// Coordinator broadcasting the round's proposal
    Proposal(Proposal),
    /// Validator answering with a vote
    Vote(Vote),
}

impl ConsensusMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConsensusError> {
        borsh::to_vec(self).map_err(|e| ConsensusError::Codec(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ConsensusError> {
        borsh::from_slice(data).map_err(|e| ConsensusError::Codec(e.to_string()))
    }
}

/// Final state of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pending,
    Finalized,
    Rejected,
}

/// Record of one round's vote over one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusDecision {
    pub round: Round,
    pub proposer: Address,
    pub batch_id: BatchId,
    /// Accepting pre-votes counted
    pub prevotes: usize,
    /// Accepting pre-commits counted
    pub precommits: usize,
    /// Size of the active-set snapshot the round counted against
    pub active_validators: usize,
    pub outcome: Outcome,
}

/// Why a round did not finalize
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Not enough active validators to form any quorum
    InsufficientValidators { active: usize, required: usize },
    /// Proposal did not come from the selected proposer
    WrongProposer { expected: Address, got: Address },
    InvalidProposal(ProposalFault),
    /// Enough reject votes arrived that the phase threshold became unreachable
    VotedDown(VotePhase),
    /// The phase deadline passed before its threshold
    TimedOut(VotePhase),
    /// The batch id already has a settled decision
    AlreadyDecided,
}

/// Result of driving one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Finalized(ConsensusDecision),
    Rejected {
        decision: ConsensusDecision,
        reason: RejectReason,
    },
    /// Shutdown arrived mid-round; nothing was finalized
    Cancelled { round: Round },
}

impl RoundOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, RoundOutcome::Finalized(_))
    }
}

/// Configuration for the consensus engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Pre-vote threshold as a fraction of the active set
    pub prevote_numerator: u64,
    pub prevote_denominator: u64,
    /// Pre-commit threshold as a fraction of the active set
    pub precommit_numerator: u64,
    pub precommit_denominator: u64,
    /// Deadline for each phase to reach its threshold
    pub phase_timeout_ms: u64,
    /// Rounds fail immediately with fewer active validators than this
    pub min_validators: usize,
}

impl ConsensusConfig {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            prevote_numerator: 1,
            prevote_denominator: 3,
            precommit_numerator: 2,
            precommit_denominator: 3,
            phase_timeout_ms: 2_000,
            min_validators: 1,
        }
    }
}

/// Stats about consensus rounds
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsensusStats {
    pub rounds_started: u64,
    pub finalized: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub equivocations: u64,
    pub invalid_signatures: u64,
    pub slashes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> Proposal {
        Proposal::new(3, 9, Address::from_label("p"), vec![[1u8; 32], [2u8; 32]], 1_000, [0u8; 32])
    }

    #[test]
    fn test_proposal_verify() {
        let mut p = proposal();
        assert_eq!(p.verify(), Ok(()));

        p.tx_hashes.reverse();
        assert_eq!(p.verify(), Err(ProposalFault::ProofOfOrderMismatch));

        let mut p = proposal();
        p.state_root = [5u8; 32];
        assert_eq!(p.verify(), Err(ProposalFault::ContentHashMismatch));
    }

    #[test]
    fn test_signing_bytes_exclude_signature() {
        let p = proposal();
        let mut vote = Vote::for_proposal(&p, VotePhase::PreVote, Address::from_label("v"), true);
        let unsigned = vote.signing_bytes().unwrap();
        vote.signature = vec![1, 2, 3];
        assert_eq!(vote.signing_bytes().unwrap(), unsigned);

        vote.accept = false;
        assert_ne!(vote.signing_bytes().unwrap(), unsigned);
    }

    #[test]
    fn test_conflicts() {
        let p = proposal();
        let voter = Address::from_label("v");
        let yes = Vote::for_proposal(&p, VotePhase::PreVote, voter, true);
        let no = Vote::for_proposal(&p, VotePhase::PreVote, voter, false);
        let commit = Vote::for_proposal(&p, VotePhase::PreCommit, voter, true);

        assert!(yes.conflicts_with(&no));
        assert!(!yes.conflicts_with(&yes.clone()));
        assert!(!yes.conflicts_with(&commit));
        assert!(yes.matches(&p));
    }

    #[test]
    fn test_reference_time_is_bound_into_votes() {
        let p = proposal();
        let voter = Address::from_label("v");
        let vote = Vote::for_proposal(&p, VotePhase::PreVote, voter, true);
        assert_eq!(vote.reference_ms, 1_000);

        let mut shifted = p.clone();
        shifted.reference_ms = 61_000;
        // Same transactions and root, so the content checks still pass
        assert_eq!(shifted.verify(), Ok(()));
        assert!(!vote.matches(&shifted));

        let other = Vote::for_proposal(&shifted, VotePhase::PreVote, voter, true);
        assert!(vote.conflicts_with(&other));
        assert_ne!(vote.signing_bytes().unwrap(), other.signing_bytes().unwrap());
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = ConsensusMessage::Proposal(proposal());
        match ConsensusMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            ConsensusMessage::Proposal(p) => assert_eq!(p, proposal()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_codec_failures_are_errors() {
        let bytes = ConsensusMessage::Proposal(proposal()).to_bytes().unwrap();
        assert!(matches!(
            ConsensusMessage::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ConsensusError::Codec(_))
        ));
        assert!(matches!(ConsensusMessage::from_bytes(&[9]), Err(ConsensusError::Codec(_))));
    }
}
