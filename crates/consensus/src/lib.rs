//! Keel Consensus - three-phase BFT finality over sequenced batches
//!
//! Architecture:
//! - Proposer chosen by a stake x reputation weighted walk, seeded by the previous
//!   finalized batch commitment (never by wall-clock time)
//! - Validators answer a proposal with signed pre-vote and pre-commit messages
//! - Pre-votes from 1/3 of the round's active set unlock the pre-commit phase,
//!   pre-commits from 2/3 finalize the batch irreversibly
//! - Conflicting votes and invalid proofs of order are slashed through the registry

pub mod engine;
pub mod error;
pub mod gossip;
pub mod proposer;
pub mod signer;
pub mod types;
pub mod voter;
pub mod votes;

pub use engine::{ConsensusEngine, RoundContext};
pub use error::ConsensusError;
pub use gossip::{GossipHub, ProposalFeed, VoteInbox, VoteSender};
pub use proposer::{round_seed, select_proposer};
pub use signer::{AcceptAllVerifier, Ed25519Signer, Ed25519Verifier, VoteSigner, VoteVerifier};
pub use types::*;
pub use voter::{spawn_local_voters, LocalVoter, VoterBehavior};
pub use votes::{InsertResult, Tally, VoteSet};
