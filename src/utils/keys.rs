//! Signing and verifying keys for the COSE algorithms supported by mdocs,
//! dispatching over the signature algorithm carried in the data.

use coset::iana;
use rand_core::CryptoRngCore;
use signature::{Signer, Verifier};

use crate::utils::x509::Certificate;

#[derive(thiserror::Error, Debug)]
pub enum KeysError {
    #[error("signing failed: {0}")]
    Signing(#[source] signature::Error),
    #[error("signature verification failed: {0}")]
    Verification(#[source] signature::Error),
    #[error("malformed signature: {0}")]
    MalformedSignature(#[source] signature::Error),
    #[error("certificate chain is empty")]
    EmptyCertificateChain,
}

/// Signature algorithms supported for issuer and device authentication.
/// The curve is implied: ES256 is P-256, ES384 is P-384, ES512 is P-521,
/// and EdDSA is Ed25519.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Es256,
    Es384,
    Es512,
    EdDsa,
}

impl SignatureAlgorithm {
    pub fn cose_algorithm(&self) -> iana::Algorithm {
        match self {
            SignatureAlgorithm::Es256 => iana::Algorithm::ES256,
            SignatureAlgorithm::Es384 => iana::Algorithm::ES384,
            SignatureAlgorithm::Es512 => iana::Algorithm::ES512,
            SignatureAlgorithm::EdDsa => iana::Algorithm::EdDSA,
        }
    }

    pub fn from_cose_algorithm(alg: iana::Algorithm) -> Option<Self> {
        match alg {
            iana::Algorithm::ES256 => Some(SignatureAlgorithm::Es256),
            iana::Algorithm::ES384 => Some(SignatureAlgorithm::Es384),
            iana::Algorithm::ES512 => Some(SignatureAlgorithm::Es512),
            iana::Algorithm::EdDSA => Some(SignatureAlgorithm::EdDsa),
            _ => None,
        }
    }
}

/// A private signing key for one of the supported algorithms.
#[derive(Clone)]
pub enum SigningKey {
    Es256(p256::ecdsa::SigningKey),
    Es384(p384::ecdsa::SigningKey),
    Es512(p521::ecdsa::SigningKey),
    EdDsa(ed25519_dalek::SigningKey),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            SigningKey::Es256(_) => "Es256",
            SigningKey::Es384(_) => "Es384",
            SigningKey::Es512(_) => "Es512",
            SigningKey::EdDsa(_) => "EdDsa",
        };
        f.debug_tuple(variant).finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn random(alg: SignatureAlgorithm, rng: &mut impl CryptoRngCore) -> Self {
        match alg {
            SignatureAlgorithm::Es256 => SigningKey::Es256(p256::ecdsa::SigningKey::random(rng)),
            SignatureAlgorithm::Es384 => SigningKey::Es384(p384::ecdsa::SigningKey::random(rng)),
            SignatureAlgorithm::Es512 => SigningKey::Es512(p521::ecdsa::SigningKey::random(rng)),
            SignatureAlgorithm::EdDsa => SigningKey::EdDsa(ed25519_dalek::SigningKey::generate(rng)),
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SigningKey::Es256(_) => SignatureAlgorithm::Es256,
            SigningKey::Es384(_) => SignatureAlgorithm::Es384,
            SigningKey::Es512(_) => SignatureAlgorithm::Es512,
            SigningKey::EdDsa(_) => SignatureAlgorithm::EdDsa,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        match self {
            SigningKey::Es256(key) => VerifyingKey::Es256(*key.verifying_key()),
            SigningKey::Es384(key) => VerifyingKey::Es384(*key.verifying_key()),
            SigningKey::Es512(key) => VerifyingKey::Es512(p521::ecdsa::VerifyingKey::from(key)),
            SigningKey::EdDsa(key) => VerifyingKey::EdDsa(key.verifying_key()),
        }
    }

    /// Sign `data`, hashing it with the digest implied by the algorithm.
    /// ECDSA signatures are in the fixed-width `r || s` form required by COSE.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeysError> {
        let signature = match self {
            SigningKey::Es256(key) => {
                let signature: p256::ecdsa::Signature =
                    key.try_sign(data).map_err(KeysError::Signing)?;
                signature.to_vec()
            }
            SigningKey::Es384(key) => {
                let signature: p384::ecdsa::Signature =
                    key.try_sign(data).map_err(KeysError::Signing)?;
                signature.to_vec()
            }
            SigningKey::Es512(key) => {
                let signature: p521::ecdsa::Signature =
                    key.try_sign(data).map_err(KeysError::Signing)?;
                signature.to_vec()
            }
            SigningKey::EdDsa(key) => {
                let signature: ed25519_dalek::Signature =
                    key.try_sign(data).map_err(KeysError::Signing)?;
                signature.to_vec()
            }
        };
        Ok(signature)
    }
}

/// A public verifying key for one of the supported algorithms.
#[derive(Clone)]
pub enum VerifyingKey {
    Es256(p256::ecdsa::VerifyingKey),
    Es384(p384::ecdsa::VerifyingKey),
    Es512(p521::ecdsa::VerifyingKey),
    EdDsa(ed25519_dalek::VerifyingKey),
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyingKey::Es256(key) => f.debug_tuple("Es256").field(key).finish(),
            VerifyingKey::Es384(key) => f.debug_tuple("Es384").field(key).finish(),
            VerifyingKey::Es512(key) => f
                .debug_tuple("Es512")
                .field(&key.to_encoded_point(true))
                .finish(),
            VerifyingKey::EdDsa(key) => f.debug_tuple("EdDsa").field(key).finish(),
        }
    }
}

impl PartialEq for VerifyingKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (VerifyingKey::Es256(a), VerifyingKey::Es256(b)) => a == b,
            (VerifyingKey::Es384(a), VerifyingKey::Es384(b)) => a == b,
            (VerifyingKey::Es512(a), VerifyingKey::Es512(b)) => {
                a.to_encoded_point(true) == b.to_encoded_point(true)
            }
            (VerifyingKey::EdDsa(a), VerifyingKey::EdDsa(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for VerifyingKey {}

impl VerifyingKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            VerifyingKey::Es256(_) => SignatureAlgorithm::Es256,
            VerifyingKey::Es384(_) => SignatureAlgorithm::Es384,
            VerifyingKey::Es512(_) => SignatureAlgorithm::Es512,
            VerifyingKey::EdDsa(_) => SignatureAlgorithm::EdDsa,
        }
    }

    pub fn verify(&self, signature: &[u8], data: &[u8]) -> Result<(), KeysError> {
        match self {
            VerifyingKey::Es256(key) => {
                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(KeysError::MalformedSignature)?;
                key.verify(data, &signature).map_err(KeysError::Verification)
            }
            VerifyingKey::Es384(key) => {
                let signature = p384::ecdsa::Signature::from_slice(signature)
                    .map_err(KeysError::MalformedSignature)?;
                key.verify(data, &signature).map_err(KeysError::Verification)
            }
            VerifyingKey::Es512(key) => {
                let signature = p521::ecdsa::Signature::from_slice(signature)
                    .map_err(KeysError::MalformedSignature)?;
                key.verify(data, &signature).map_err(KeysError::Verification)
            }
            VerifyingKey::EdDsa(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(KeysError::MalformedSignature)?;
                key.verify(data, &signature).map_err(KeysError::Verification)
            }
        }
    }
}

/// An issuer private key together with its certificate chain, leaf first.
/// The chain ends up in the `x5chain` header of signed MSOs.
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    certificate_chain: Vec<Certificate>,
}

impl KeyPair {
    pub fn new(
        signing_key: SigningKey,
        certificate_chain: Vec<Certificate>,
    ) -> Result<Self, KeysError> {
        if certificate_chain.is_empty() {
            return Err(KeysError::EmptyCertificateChain);
        }
        Ok(KeyPair {
            signing_key,
            certificate_chain,
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.certificate_chain
    }

    /// The leaf certificate, i.e. the one containing this key pair's public key.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate_chain[0]
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SignatureAlgorithm::Es256)]
    #[case(SignatureAlgorithm::Es384)]
    #[case(SignatureAlgorithm::Es512)]
    #[case(SignatureAlgorithm::EdDsa)]
    fn sign_and_verify(#[case] alg: SignatureAlgorithm) {
        let key = SigningKey::random(alg, &mut OsRng);
        assert_eq!(key.algorithm(), alg);

        let signature = key.sign(b"some data").unwrap();
        key.verifying_key().verify(&signature, b"some data").unwrap();
        key.verifying_key()
            .verify(&signature, b"other data")
            .unwrap_err();

        let other_key = SigningKey::random(alg, &mut OsRng);
        other_key
            .verifying_key()
            .verify(&signature, b"some data")
            .unwrap_err();
    }

    #[test]
    fn key_pair_requires_a_certificate() {
        let key = SigningKey::random(SignatureAlgorithm::Es256, &mut OsRng);
        assert!(matches!(
            KeyPair::new(key, vec![]),
            Err(KeysError::EmptyCertificateChain)
        ));
    }
}
