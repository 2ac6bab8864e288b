//! Per-round vote aggregation
//!
//! Each validator is counted at most once per phase. A second vote from the same
//! validator in the same phase that says something different is kept as evidence and
//! the voter is excluded from every tally for the rest of the round.

use crate::types::{Proposal, Vote, VotePhase};
use keel_types::{Address, Round};
use std::collections::{BTreeMap, BTreeSet};

/// Result of offering a vote to a [`VoteSet`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// First vote from this validator in this phase
    Inserted,
    /// Byte-identical repeat, ignored
    Duplicate,
    /// Voter already signed a different vote in this phase; carries the earlier one
    Conflict(Vote),
    /// Voter was already marked faulty this round
    Ignored,
    /// Vote belongs to another round
    WrongRound,
}

/// Accept / reject counts for one phase against one proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub accepts: usize,
    pub rejects: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.accepts + self.rejects
    }
}

/// Votes collected in a single round
#[derive(Debug, Clone)]
pub struct VoteSet {
    round: Round,
    prevotes: BTreeMap<Address, Vote>,
    precommits: BTreeMap<Address, Vote>,
    faulty: BTreeSet<Address>,
}

impl VoteSet {
    pub fn new(round: Round) -> Self {
        Self {
            round,
            prevotes: BTreeMap::new(),
            precommits: BTreeMap::new(),
            faulty: BTreeSet::new(),
        }
    }

    pub fn round(&self) -> Round {
        self.round
    }

    fn phase_mut(&mut self, phase: VotePhase) -> &mut BTreeMap<Address, Vote> {
        match phase {
            VotePhase::PreVote => &mut self.prevotes,
            VotePhase::PreCommit => &mut self.precommits,
        }
    }

    fn phase(&self, phase: VotePhase) -> &BTreeMap<Address, Vote> {
        match phase {
            VotePhase::PreVote => &self.prevotes,
            VotePhase::PreCommit => &self.precommits,
        }
    }

    /// Add a vote. Signature and membership checks happen before this.
    pub fn insert(&mut self, vote: Vote) -> InsertResult {
        if vote.round != self.round {
            return InsertResult::WrongRound;
        }
        if self.faulty.contains(&vote.voter) {
            return InsertResult::Ignored;
        }

        let voter = vote.voter;
        match self.phase(vote.phase).get(&voter).cloned() {
            Some(existing) if existing.conflicts_with(&vote) => {
                self.faulty.insert(voter);
                InsertResult::Conflict(existing)
            }
            Some(_) => InsertResult::Duplicate,
            None => {
                self.phase_mut(vote.phase).insert(voter, vote);
                InsertResult::Inserted
            }
        }
    }

    /// Count votes for `proposal` in `phase`, skipping faulty voters.
    ///
    /// A vote about different content counts as a reject.
    pub fn tally(&self, phase: VotePhase, proposal: &Proposal) -> Tally {
        let mut tally = Tally::default();
        for (voter, vote) in self.phase(phase) {
            if self.faulty.contains(voter) {
                continue;
            }
            if vote.accept && vote.matches(proposal) {
                tally.accepts += 1;
            } else {
                tally.rejects += 1;
            }
        }
        tally
    }

    pub fn has_voted(&self, phase: VotePhase, voter: &Address) -> bool {
        self.phase(phase).contains_key(voter)
    }

    pub fn mark_faulty(&mut self, voter: Address) {
        self.faulty.insert(voter);
    }

    pub fn is_faulty(&self, voter: &Address) -> bool {
        self.faulty.contains(voter)
    }

    pub fn faulty(&self) -> impl Iterator<Item = &Address> {
        self.faulty.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> Proposal {
        Proposal::new(4, 2, Address::from_label("proposer"), vec![[1u8; 32]], 0, [0u8; 32])
    }

    fn vote(voter: &str, phase: VotePhase, accept: bool) -> Vote {
        Vote::for_proposal(&proposal(), phase, Address::from_label(voter), accept)
    }

    #[test]
    fn test_counts_each_voter_once() {
        let mut set = VoteSet::new(4);
        assert_eq!(set.insert(vote("a", VotePhase::PreVote, true)), InsertResult::Inserted);
        assert_eq!(set.insert(vote("a", VotePhase::PreVote, true)), InsertResult::Duplicate);
        assert_eq!(set.insert(vote("b", VotePhase::PreVote, false)), InsertResult::Inserted);
        assert_eq!(set.insert(vote("a", VotePhase::PreCommit, true)), InsertResult::Inserted);

        let prevotes = set.tally(VotePhase::PreVote, &proposal());
        assert_eq!(prevotes, Tally { accepts: 1, rejects: 1 });
        assert_eq!(set.tally(VotePhase::PreCommit, &proposal()).accepts, 1);
    }

    #[test]
    fn test_conflict_excludes_voter() {
        let mut set = VoteSet::new(4);
        set.insert(vote("a", VotePhase::PreVote, true));
        set.insert(vote("a", VotePhase::PreCommit, true));

        match set.insert(vote("a", VotePhase::PreVote, false)) {
            InsertResult::Conflict(existing) => assert!(existing.accept),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(set.is_faulty(&Address::from_label("a")));
        assert_eq!(set.tally(VotePhase::PreVote, &proposal()).total(), 0);
        assert_eq!(set.tally(VotePhase::PreCommit, &proposal()).total(), 0);
        assert_eq!(set.insert(vote("a", VotePhase::PreCommit, true)), InsertResult::Ignored);
    }

    #[test]
    fn test_mismatched_content_counts_as_reject() {
        let mut set = VoteSet::new(4);
        let mut other = vote("a", VotePhase::PreVote, true);
        other.content_hash = [9u8; 32];
        set.insert(other);
        assert_eq!(set.tally(VotePhase::PreVote, &proposal()), Tally { accepts: 0, rejects: 1 });
    }

    #[test]
    fn test_wrong_round() {
        let mut set = VoteSet::new(5);
        assert_eq!(set.insert(vote("a", VotePhase::PreVote, true)), InsertResult::WrongRound);
    }
}
