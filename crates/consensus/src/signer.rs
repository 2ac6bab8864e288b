//! Vote signing and verification seams

use crate::error::ConsensusError;
use crate::types::Vote;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use keel_types::Address;

/// Produces signatures for one validator identity
pub trait VoteSigner: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Fill in `vote.voter` and sign it
    fn sign_vote(&self, mut vote: Vote) -> Result<Vote, ConsensusError> {
        vote.voter = self.address();
        vote.signature = self.sign(&vote.signing_bytes()?);
        Ok(vote)
    }
}

/// Checks that a vote was signed by its claimed voter.
///
/// Implementations should be deterministic and side-effect free.
pub trait VoteVerifier: Send + Sync {
    fn verify(&self, vote: &Vote) -> bool;
}

/// ed25519 identity; the address is the verifying key
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Deterministic key derived from a label (local voters and tests)
    pub fn from_label(label: &str) -> Self {
        Self::from_seed(*blake3::hash(label.as_bytes()).as_bytes())
    }
}

impl VoteSigner for Ed25519Signer {
    fn address(&self) -> Address {
        Address::new(self.key.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}

/// Verifies ed25519 signatures against the voter address
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl VoteVerifier for Ed25519Verifier {
    fn verify(&self, vote: &Vote) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(vote.voter.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&vote.signature) else {
            return false;
        };
        let Ok(message) = vote.signing_bytes() else {
            return false;
        };
        key.verify(&message, &signature).is_ok()
    }
}

/// A verifier that accepts every vote.
///
/// Useful for tests that exercise counting rules without real keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl VoteVerifier for AcceptAllVerifier {
    fn verify(&self, _vote: &Vote) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Proposal, VotePhase};

    fn proposal() -> Proposal {
        Proposal::new(1, 1, Address::default(), vec![[3u8; 32]], 0, [0u8; 32])
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = Ed25519Signer::from_label("validator-0");
        let unsigned = Vote::for_proposal(&proposal(), VotePhase::PreVote, Address::default(), true);
        let vote = signer.sign_vote(unsigned).unwrap();

        assert_eq!(vote.voter, signer.address());
        assert!(Ed25519Verifier.verify(&vote));
    }

    #[test]
    fn test_tampered_vote_fails() {
        let signer = Ed25519Signer::from_label("validator-0");
        let unsigned = Vote::for_proposal(&proposal(), VotePhase::PreCommit, Address::default(), true);
        let mut vote = signer.sign_vote(unsigned).unwrap();
        vote.accept = false;
        assert!(!Ed25519Verifier.verify(&vote));
    }

    #[test]
    fn test_vote_claiming_other_identity_fails() {
        let signer = Ed25519Signer::from_label("validator-0");
        let other = Ed25519Signer::from_label("validator-1");
        let unsigned = Vote::for_proposal(&proposal(), VotePhase::PreVote, Address::default(), true);
        let mut vote = signer.sign_vote(unsigned).unwrap();
        vote.voter = other.address();
        assert!(!Ed25519Verifier.verify(&vote));
    }
}
