//! In-process gossip between the round coordinator and validators
//!
//! The coordinator broadcasts proposals to every subscribed validator, validators answer
//! with votes on a shared inbox. Both directions carry borsh-encoded `ConsensusMessage`
//! frames so a network transport can be dropped in underneath without changing callers.

use crate::error::ConsensusError;
use crate::types::{ConsensusMessage, Proposal, Vote};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Default)]
struct GossipStats {
    proposals_published: AtomicU64,
    undecodable_frames: AtomicU64,
}

/// Proposal fan-out plus the sending half of the vote inbox
#[derive(Clone)]
pub struct GossipHub {
    proposals: broadcast::Sender<Vec<u8>>,
    votes: mpsc::Sender<Vec<u8>>,
    stats: Arc<GossipStats>,
}

impl GossipHub {
    /// Create a hub and the inbox the consensus engine drains
    pub fn new(capacity: usize) -> (Self, VoteInbox) {
        let (proposals, _) = broadcast::channel(capacity);
        let (votes, rx) = mpsc::channel(capacity);
        let stats = Arc::new(GossipStats::default());
        let hub = Self {
            proposals,
            votes,
            stats: stats.clone(),
        };
        (hub, VoteInbox { rx, stats })
    }

    /// Broadcast a proposal to all subscribed validators. Returns how many received it.
    pub fn publish(&self, proposal: &Proposal) -> usize {
        let data = match ConsensusMessage::Proposal(proposal.clone()).to_bytes() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Failed to encode proposal for round {}: {}", proposal.round, e);
                return 0;
            }
        };
        match self.proposals.send(data) {
            Ok(n) => {
                self.stats.proposals_published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Published proposal for batch {} round {} to {} validators",
                    proposal.batch_id,
                    proposal.round,
                    n
                );
                n
            }
            Err(_) => {
                // No validators subscribed
                tracing::warn!("Proposal for round {} had no subscribers", proposal.round);
                0
            }
        }
    }

    pub fn subscribe(&self) -> ProposalFeed {
        ProposalFeed {
            rx: self.proposals.subscribe(),
        }
    }

    pub fn vote_sender(&self) -> VoteSender {
        VoteSender {
            tx: self.votes.clone(),
        }
    }

    pub fn subscribers(&self) -> usize {
        self.proposals.receiver_count()
    }

    pub fn proposals_published(&self) -> u64 {
        self.stats.proposals_published.load(Ordering::Relaxed)
    }
}

/// Validator side: stream of proposals
pub struct ProposalFeed {
    rx: broadcast::Receiver<Vec<u8>>,
}

impl ProposalFeed {
    /// Next proposal, or `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<Proposal> {
        loop {
            match self.rx.recv().await {
                Ok(data) => match ConsensusMessage::from_bytes(&data) {
                    Ok(ConsensusMessage::Proposal(proposal)) => return Some(proposal),
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable proposal frame: {}", e);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Validator lagged {} proposals", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Validator side: vote submission
#[derive(Clone)]
pub struct VoteSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl VoteSender {
    pub async fn send(&self, vote: &Vote) -> Result<(), ConsensusError> {
        self.send_raw(ConsensusMessage::Vote(vote.clone()).to_bytes()?).await
    }

    /// Push an already-encoded frame
    pub async fn send_raw(&self, frame: Vec<u8>) -> Result<(), ConsensusError> {
        self.tx.send(frame).await.map_err(|_| ConsensusError::ChannelClosed)
    }
}

/// Engine side: decoded votes from every validator
pub struct VoteInbox {
    rx: mpsc::Receiver<Vec<u8>>,
    stats: Arc<GossipStats>,
}

impl VoteInbox {
    /// Next decodable vote, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Vote> {
        while let Some(data) = self.rx.recv().await {
            if let Some(vote) = self.decode(&data) {
                return Some(vote);
            }
        }
        None
    }

    /// Discard anything already queued (votes left over from earlier rounds)
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn undecodable_frames(&self) -> u64 {
        self.stats.undecodable_frames.load(Ordering::Relaxed)
    }

    fn decode(&self, data: &[u8]) -> Option<Vote> {
        match ConsensusMessage::from_bytes(data) {
            Ok(ConsensusMessage::Vote(vote)) => Some(vote),
            Ok(ConsensusMessage::Proposal(p)) => {
                tracing::debug!("Ignoring proposal frame for round {} on vote inbox", p.round);
                None
            }
            Err(e) => {
                self.stats.undecodable_frames.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropping undecodable vote frame: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VotePhase;
    use keel_types::Address;

    fn proposal() -> Proposal {
        Proposal::new(1, 1, Address::from_label("p"), vec![[1u8; 32]], 0, [0u8; 32])
    }

    #[tokio::test]
    async fn test_proposal_fanout() {
        let (hub, _inbox) = GossipHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(&proposal()), 2);
        assert_eq!(a.recv().await, Some(proposal()));
        assert_eq!(b.recv().await, Some(proposal()));
        assert_eq!(hub.proposals_published(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let (hub, _inbox) = GossipHub::new(16);
        assert_eq!(hub.publish(&proposal()), 0);
    }

    #[tokio::test]
    async fn test_inbox_skips_garbage() {
        let (hub, mut inbox) = GossipHub::new(16);
        let sender = hub.vote_sender();
        let vote = Vote::for_proposal(&proposal(), VotePhase::PreVote, Address::from_label("v"), true);

        sender.send_raw(vec![0xff, 0x00, 0x13]).await.unwrap();
        sender.send(&vote).await.unwrap();

        assert_eq!(inbox.recv().await, Some(vote));
        assert_eq!(inbox.undecodable_frames(), 1);
    }

    #[tokio::test]
    async fn test_drain() {
        let (hub, mut inbox) = GossipHub::new(16);
        let sender = hub.vote_sender();
        let vote = Vote::for_proposal(&proposal(), VotePhase::PreVote, Address::from_label("v"), true);
        sender.send(&vote).await.unwrap();
        sender.send(&vote).await.unwrap();
        assert_eq!(inbox.drain(), 2);
    }
}
