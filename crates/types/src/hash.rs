//! 32-byte hashes and the proof-of-order commitment

/// A blake3 digest
pub type Hash = [u8; 32];

/// All-zero hash, used as the genesis commitment
pub const ZERO_HASH: Hash = [0u8; 32];

const PROOF_OF_ORDER_DOMAIN: &[u8] = b"keel/proof-of-order/v1";
const BATCH_COMMITMENT_DOMAIN: &[u8] = b"keel/batch-commitment/v1";

/// Commitment over an ordered transaction sequence.
///
/// The length is bound in so that a prefix of a sequence never shares its proof.
pub fn proof_of_order(tx_hashes: &[Hash]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(PROOF_OF_ORDER_DOMAIN);
    hasher.update(&(tx_hashes.len() as u64).to_le_bytes());
    for hash in tx_hashes {
        hasher.update(hash);
    }
    *hasher.finalize().as_bytes()
}

/// Commitment over a whole batch record: its id, its ordered content and its state root.
///
/// Voters sign this as the batch content hash, and once finalized it seeds the next
/// round's proposer selection.
pub fn batch_commitment(batch_id: u64, proof_of_order: &Hash, state_root: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(BATCH_COMMITMENT_DOMAIN);
    hasher.update(&batch_id.to_le_bytes());
    hasher.update(proof_of_order);
    hasher.update(state_root);
    *hasher.finalize().as_bytes()
}

/// First eight base58 characters of a hash, for logs
pub fn short(hash: &Hash) -> String {
    let mut encoded = bs58::encode(hash).into_string();
    encoded.truncate(8);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_of_order_depends_on_order() {
        let a = [1u8; 32];
        let b = [2u8; 32];

        assert_eq!(proof_of_order(&[a, b]), proof_of_order(&[a, b]));
        assert_ne!(proof_of_order(&[a, b]), proof_of_order(&[b, a]));
        assert_ne!(proof_of_order(&[a]), proof_of_order(&[a, a]));
    }

    #[test]
    fn test_batch_commitment_binds_id() {
        let poo = proof_of_order(&[[7u8; 32]]);
        assert_ne!(
            batch_commitment(1, &poo, &ZERO_HASH),
            batch_commitment(2, &poo, &ZERO_HASH)
        );
    }

    #[test]
    fn test_empty_sequence_has_a_proof() {
        assert_ne!(proof_of_order(&[]), ZERO_HASH);
    }
}
