//! Payload commitments and shard digests

use keel_types::Hash;

const PAYLOAD_DOMAIN: &[u8] = b"keel/da-commitment/v1";
const SHARD_DOMAIN: &[u8] = b"keel/da-shard/v1";

/// Binding commitment over the original payload
pub fn payload_commitment(payload: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(PAYLOAD_DOMAIN);
    hasher.update(&(payload.len() as u64).to_le_bytes());
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Digest of one shard at its index
pub fn shard_digest(index: usize, shard: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SHARD_DOMAIN);
    hasher.update(&(index as u64).to_le_bytes());
    hasher.update(shard);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_is_exact() {
        let c = payload_commitment(b"batch payload");
        assert_eq!(c, payload_commitment(b"batch payload"));
        assert_ne!(c, payload_commitment(b"batch payloae"));
        assert_ne!(c, payload_commitment(b"batch payload\0"));
    }

    #[test]
    fn test_shard_digest_binds_index() {
        assert_ne!(shard_digest(0, b"abc"), shard_digest(1, b"abc"));
    }
}
