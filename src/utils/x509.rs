//! X.509 certificate handling: DER round-trips, public key recovery, chain
//! verification against trust anchors, and (behind the `generate` feature)
//! certificate generation for tests and development.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls_pki_types::{CertificateDer, TrustAnchor, UnixTime};
use webpki::{EndEntityCert, KeyUsage};
use x509_parser::{
    certificate::X509Certificate,
    oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_SIG_ED25519},
    prelude::FromDer,
};

const OID_SECP256R1: &str = "1.2.840.10045.3.1.7";
const OID_SECP384R1: &str = "1.3.132.0.34";
const OID_SECP521R1: &str = "1.3.132.0.35";

use crate::utils::{
    generator::Generator,
    keys::{SigningKey, VerifyingKey},
};

#[derive(thiserror::Error, Debug)]
pub enum CertificateError {
    #[error("certificate parsing failed: {0}")]
    Parsing(#[from] x509_parser::nom::Err<x509_parser::error::X509Error>),
    #[error("certificate field error: {0}")]
    Field(#[from] x509_parser::error::X509Error),
    #[error("PEM decoding failed: {0}")]
    Pem(#[from] x509_parser::nom::Err<x509_parser::prelude::PEMError>),
    #[error("certificate has expired or is not yet valid")]
    Expired,
    #[error("certificate chain verification failed: {0}")]
    Verification(#[source] webpki::Error),
    #[error("unsupported certificate public key type")]
    UnsupportedKeyType,
    #[error("malformed certificate public key")]
    KeyParsing,
    #[cfg(feature = "generate")]
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
    #[cfg(feature = "generate")]
    #[error("generated key could not be parsed: {0}")]
    GeneratedKey(#[from] p256::pkcs8::Error),
    #[cfg(feature = "generate")]
    #[error("invalid certificate validity: {0}")]
    Validity(#[from] time::error::ComponentRange),
}

/// Usage of a certificate within the ISO 18013-5 ecosystem, identified by its
/// extended key usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateUsage {
    /// An mdoc document signer (issuing authority).
    Mdl,
    /// An mdoc reader (relying party).
    ReaderAuth,
}

impl CertificateUsage {
    /// The DER value octets of the extended key usage OID:
    /// 1.0.18013.5.1.2 for document signers, 1.0.18013.5.1.6 for readers.
    pub(crate) fn eku(&self) -> &'static [u8] {
        match self {
            CertificateUsage::Mdl => &[0x28, 0x81, 0x8C, 0x5D, 0x05, 0x01, 0x02],
            CertificateUsage::ReaderAuth => &[0x28, 0x81, 0x8C, 0x5D, 0x05, 0x01, 0x06],
        }
    }

    #[cfg(feature = "generate")]
    fn oid_components(&self) -> &'static [u64] {
        match self {
            CertificateUsage::Mdl => &[1, 0, 18013, 5, 1, 2],
            CertificateUsage::ReaderAuth => &[1, 0, 18013, 5, 1, 6],
        }
    }
}

/// A DER-encoded X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate(Vec<u8>);

impl From<Vec<u8>> for Certificate {
    fn from(bts: Vec<u8>) -> Self {
        Certificate(bts)
    }
}

impl From<&[u8]> for Certificate {
    fn from(bts: &[u8]) -> Self {
        Certificate(bts.to_vec())
    }
}

impl Certificate {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Read the first certificate from a PEM-encoded input.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CertificateError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)?;
        Ok(Certificate(pem.contents))
    }

    /// Parse the DER encoding. The resulting value borrows from `self`.
    pub fn to_x509(&self) -> Result<X509Certificate, CertificateError> {
        let (_, cert) = X509Certificate::from_der(&self.0)?;
        Ok(cert)
    }

    /// Recover the public key from the certificate's subject public key info,
    /// dispatching on the key's algorithm and curve.
    pub fn public_key(&self) -> Result<VerifyingKey, CertificateError> {
        let cert = self.to_x509()?;
        let spki = cert.public_key();
        let key_bytes: &[u8] = &spki.subject_public_key.data;

        if spki.algorithm.algorithm == OID_KEY_TYPE_EC_PUBLIC_KEY {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|params| params.as_oid().ok())
                .ok_or(CertificateError::UnsupportedKeyType)?;

            match curve.to_id_string().as_str() {
                OID_SECP256R1 => p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(VerifyingKey::Es256)
                    .map_err(|_| CertificateError::KeyParsing),
                OID_SECP384R1 => p384::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(VerifyingKey::Es384)
                    .map_err(|_| CertificateError::KeyParsing),
                OID_SECP521R1 => p521::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(VerifyingKey::Es512)
                    .map_err(|_| CertificateError::KeyParsing),
                _ => Err(CertificateError::UnsupportedKeyType),
            }
        } else if spki.algorithm.algorithm == OID_SIG_ED25519 {
            let bts: [u8; 32] = key_bytes
                .try_into()
                .map_err(|_| CertificateError::KeyParsing)?;
            ed25519_dalek::VerifyingKey::from_bytes(&bts)
                .map(VerifyingKey::EdDsa)
                .map_err(|_| CertificateError::KeyParsing)
        } else {
            Err(CertificateError::UnsupportedKeyType)
        }
    }

    /// The common names in the certificate's subject.
    pub fn common_names(&self) -> Result<Vec<String>, CertificateError> {
        let cert = self.to_x509()?;
        cert.subject()
            .iter_common_name()
            .map(|cn| cn.as_str().map(str::to_string).map_err(CertificateError::from))
            .collect()
    }

    /// The common names in the certificate's issuer.
    pub fn issuer_common_names(&self) -> Result<Vec<String>, CertificateError> {
        let cert = self.to_x509()?;
        cert.issuer()
            .iter_common_name()
            .map(|cn| cn.as_str().map(str::to_string).map_err(CertificateError::from))
            .collect()
    }

    /// Use this certificate as a trust anchor for chain verification.
    pub fn trust_anchor(&self) -> Result<TrustAnchor<'static>, CertificateError> {
        let der = CertificateDer::from(self.0.as_slice());
        let anchor =
            webpki::anchor_from_trusted_cert(&der).map_err(CertificateError::Verification)?;
        Ok(anchor.to_owned())
    }

    /// Verify that this certificate chains to one of `trust_anchors` through
    /// `intermediates`, is valid at the generated time, and carries the
    /// extended key usage of `usage`.
    pub fn verify(
        &self,
        usage: CertificateUsage,
        intermediates: &[&[u8]],
        time: &impl Generator<DateTime<Utc>>,
        trust_anchors: &[TrustAnchor],
    ) -> Result<(), CertificateError> {
        let der = CertificateDer::from(self.0.as_slice());
        let end_entity = EndEntityCert::try_from(&der).map_err(CertificateError::Verification)?;
        let intermediates: Vec<CertificateDer> = intermediates
            .iter()
            .map(|bts| CertificateDer::from(*bts))
            .collect();

        let algorithms: &[&dyn rustls_pki_types::SignatureVerificationAlgorithm] = &[
            webpki::ring::ECDSA_P256_SHA256,
            webpki::ring::ECDSA_P256_SHA384,
            webpki::ring::ECDSA_P384_SHA256,
            webpki::ring::ECDSA_P384_SHA384,
            webpki::ring::ED25519,
        ];

        let timestamp = time.generate().timestamp().max(0) as u64;
        end_entity
            .verify_for_usage(
                algorithms,
                trust_anchors,
                &intermediates,
                UnixTime::since_unix_epoch(Duration::from_secs(timestamp)),
                KeyUsage::required(usage.eku()),
                None,
                None,
            )
            .map(|_| ())
            .map_err(|error| match error {
                webpki::Error::CertExpired | webpki::Error::CertNotValidYet => {
                    CertificateError::Expired
                }
                error => CertificateError::Verification(error),
            })
    }
}

#[cfg(feature = "generate")]
pub use generate::CertificateConfiguration;

#[cfg(feature = "generate")]
mod generate {
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };

    use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};

    use super::*;

    /// Optional overrides for generated certificates. Defaults to rcgen's
    /// serial and validity choices.
    #[derive(Debug, Clone, Default)]
    pub struct CertificateConfiguration {
        pub not_before: Option<DateTime<Utc>>,
        pub not_after: Option<DateTime<Utc>>,
        pub serial_number: Option<Vec<u8>>,
    }

    fn signing_key(key_pair: &KeyPair) -> Result<SigningKey, CertificateError> {
        let key = p256::ecdsa::SigningKey::from_pkcs8_der(&key_pair.serialize_der())?;
        Ok(SigningKey::Es256(key))
    }

    fn apply_configuration(
        params: &mut CertificateParams,
        config: CertificateConfiguration,
    ) -> Result<(), CertificateError> {
        if let Some(not_before) = config.not_before {
            params.not_before = time::OffsetDateTime::from_unix_timestamp(not_before.timestamp())?;
        }
        if let Some(not_after) = config.not_after {
            params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp())?;
        }
        if let Some(serial_number) = config.serial_number {
            params.serial_number = Some(serial_number.into());
        }
        Ok(())
    }

    impl Certificate {
        /// Generate a self-signed CA certificate and its P-256 signing key.
        pub fn new_ca(common_name: &str) -> Result<(Certificate, SigningKey), CertificateError> {
            Certificate::new_ca_with_configuration(common_name, Default::default())
        }

        /// See [`Certificate::new_ca()`]; serial number and validity window
        /// can be overridden through `config`.
        pub fn new_ca_with_configuration(
            common_name: &str,
            config: CertificateConfiguration,
        ) -> Result<(Certificate, SigningKey), CertificateError> {
            let key_pair = KeyPair::generate()?;

            let mut params = CertificateParams::new(vec![])?;
            params
                .distinguished_name
                .push(DnType::CommonName, common_name);
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
            apply_configuration(&mut params, config)?;

            let certificate = params.self_signed(&key_pair)?;
            Ok((
                Certificate::from(certificate.der().to_vec()),
                signing_key(&key_pair)?,
            ))
        }

        /// Generate a certificate signed by `ca`, carrying the extended key
        /// usage of `usage`, and its P-256 signing key.
        pub fn new(
            ca: &Certificate,
            ca_key: &SigningKey,
            common_name: &str,
            usage: CertificateUsage,
        ) -> Result<(Certificate, SigningKey), CertificateError> {
            Certificate::new_with_configuration(ca, ca_key, common_name, usage, Default::default())
        }

        /// See [`Certificate::new()`]; serial number and validity window can
        /// be overridden through `config`.
        pub fn new_with_configuration(
            ca: &Certificate,
            ca_key: &SigningKey,
            common_name: &str,
            usage: CertificateUsage,
            config: CertificateConfiguration,
        ) -> Result<(Certificate, SigningKey), CertificateError> {
            let SigningKey::Es256(ca_signing_key) = ca_key else {
                return Err(CertificateError::UnsupportedKeyType);
            };
            let ca_key_der = ca_signing_key.to_pkcs8_der()?;
            let issuer_key = KeyPair::try_from(ca_key_der.as_bytes())?;
            let issuer_params =
                CertificateParams::from_ca_cert_der(&CertificateDer::from(ca.as_bytes()))?;
            let issuer = issuer_params.self_signed(&issuer_key)?;

            let key_pair = KeyPair::generate()?;
            let mut params = CertificateParams::new(vec![])?;
            params
                .distinguished_name
                .push(DnType::CommonName, common_name);
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages =
                vec![ExtendedKeyUsagePurpose::Other(usage.oid_components().to_vec())];
            apply_configuration(&mut params, config)?;

            let certificate = params.signed_by(&key_pair, &issuer, &issuer_key)?;
            Ok((
                Certificate::from(certificate.der().to_vec()),
                signing_key(&key_pair)?,
            ))
        }
    }
}
