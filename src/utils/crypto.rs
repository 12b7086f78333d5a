//! Digest computation over CBOR serializations.

use serde::Serialize;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::{
    iso::mdocs::DigestAlgorithm,
    utils::serialization::{cbor_serialize, CborError},
};

impl DigestAlgorithm {
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Length in bytes of digests produced by this algorithm.
    pub fn digest_length(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

/// Computes the digest of the CBOR serialization of `val`.
pub fn cbor_digest<T: Serialize>(alg: DigestAlgorithm, val: &T) -> Result<Vec<u8>, CborError> {
    let bts = cbor_serialize(val)?;
    Ok(alg.digest(&bts))
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Draw `len` random bytes from a cryptographically secure RNG.
pub fn random_bytes(rng: &mut impl rand_core::CryptoRngCore, len: usize) -> Vec<u8> {
    let mut bts = vec![0; len];
    rng.fill_bytes(&mut bts);
    bts
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn digest_lengths() {
        for alg in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(alg.digest(b"abc").len(), alg.digest_length());
        }
    }

    #[test]
    fn sha256_test_vector() {
        assert_eq!(
            DigestAlgorithm::Sha256.digest(b"abc"),
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
        );
    }

    #[test]
    fn cbor_digest_hashes_the_serialization() {
        // CBOR of "abc" is 0x63616263.
        assert_eq!(
            cbor_digest(DigestAlgorithm::Sha256, &"abc").unwrap(),
            DigestAlgorithm::Sha256.digest(&hex!("63616263")),
        );
    }
}
