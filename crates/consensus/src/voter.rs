//! Local validator voter - receives proposals, checks them, answers with signed votes

use crate::gossip::{GossipHub, ProposalFeed, VoteSender};
use crate::signer::VoteSigner;
use crate::types::{Proposal, Vote, VotePhase};
use keel_types::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a local voter behaves (non-honest modes exist for fault injection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoterBehavior {
    #[default]
    Honest,
    /// Never votes
    Silent,
    /// Rejects every proposal
    RejectAll,
    /// Pre-votes honestly but never pre-commits
    PreVoteOnly,
    /// Signs both an accept and a reject pre-vote in the same round
    Equivocate,
}

/// Validator task that verifies proposals and votes on them
pub struct LocalVoter {
    signer: Arc<dyn VoteSigner>,
    behavior: VoterBehavior,
    feed: ProposalFeed,
    votes: VoteSender,
}

impl LocalVoter {
    pub fn new(signer: Arc<dyn VoteSigner>, behavior: VoterBehavior, hub: &GossipHub) -> Self {
        Self {
            signer,
            behavior,
            feed: hub.subscribe(),
            votes: hub.vote_sender(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Signed votes this voter sends for `proposal`, in send order
    pub fn votes_for(&self, proposal: &Proposal) -> Vec<Vote> {
        let valid = match proposal.verify() {
            Ok(()) => true,
            Err(fault) => {
                tracing::warn!(
                    "Validator {:?} rejecting batch {} in round {}: {:?}",
                    self.address(),
                    proposal.batch_id,
                    proposal.round,
                    fault
                );
                false
            }
        };

        let plan = match self.behavior {
            VoterBehavior::Honest => vec![(VotePhase::PreVote, valid), (VotePhase::PreCommit, valid)],
            VoterBehavior::Silent => Vec::new(),
            VoterBehavior::RejectAll => vec![(VotePhase::PreVote, false), (VotePhase::PreCommit, false)],
            VoterBehavior::PreVoteOnly => vec![(VotePhase::PreVote, valid)],
            VoterBehavior::Equivocate => vec![
                (VotePhase::PreVote, true),
                (VotePhase::PreVote, false),
                (VotePhase::PreCommit, true),
            ],
        };

        plan.into_iter()
            .filter_map(|(phase, accept)| {
                let vote = Vote::for_proposal(proposal, phase, self.address(), accept);
                match self.signer.sign_vote(vote) {
                    Ok(vote) => Some(vote),
                    Err(e) => {
                        tracing::warn!("Validator {:?} failed to sign {:?}: {}", self.address(), phase, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Run until shutdown or until the hub goes away
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Validator {:?} voting as {:?}", self.address(), self.behavior);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                proposal = self.feed.recv() => {
                    let Some(proposal) = proposal else {
                        tracing::debug!("Proposal feed closed");
                        break;
                    };
                    for vote in self.votes_for(&proposal) {
                        if self.votes.send(&vote).await.is_err() {
                            tracing::debug!("Vote inbox closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Subscribe and spawn one voter task per signer
pub fn spawn_local_voters(
    voters: Vec<(Arc<dyn VoteSigner>, VoterBehavior)>,
    hub: &GossipHub,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    voters
        .into_iter()
        .map(|(signer, behavior)| {
            let voter = LocalVoter::new(signer, behavior, hub);
            tokio::spawn(voter.run(shutdown.clone()))
        })
        .collect()
}
