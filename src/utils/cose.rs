//! COSE support: typed wrappers around [`coset`]'s `COSE_Sign1`, signing and
//! verification over the supported algorithms, the `x5chain` header, and a
//! serde-capable `COSE_Key` wrapper.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use ciborium::value::Value;
use coset::{
    iana::{self, EnumI64},
    AsCborValue, CoseSign1, CoseSign1Builder, Header, HeaderBuilder, Label,
    RegisteredLabelWithPrivate, TaggedCborSerializable,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rustls_pki_types::TrustAnchor;
use serde::{
    de::{self, DeserializeOwned},
    ser, Deserialize, Deserializer, Serialize, Serializer,
};

use crate::utils::{
    generator::Generator,
    keys::{KeysError, SignatureAlgorithm, SigningKey, VerifyingKey},
    serialization::{cbor_serialize, CborError},
    x509::{Certificate, CertificateError, CertificateUsage},
};

/// COSE header label registered for `x5chain` (RFC 9360).
pub const COSE_X5CHAIN_HEADER_LABEL: i64 = 33;

#[derive(thiserror::Error, Debug)]
pub enum CoseError {
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("key error: {0}")]
    Keys(#[from] KeysError),
    #[error("COSE format error: {0}")]
    Format(coset::CoseError),
    #[error("missing payload")]
    MissingPayload,
    #[error("missing algorithm in protected header")]
    AlgorithmMissing,
    #[error("unsupported COSE algorithm")]
    UnsupportedAlgorithm,
    #[error("protected header algorithm does not match key type")]
    AlgorithmMismatch,
    #[error("missing x5chain header")]
    X5ChainMissing,
    #[error("malformed x5chain header")]
    MalformedX5Chain,
    #[error("unsupported COSE key type")]
    UnsupportedKeyType,
    #[error("unsupported elliptic curve")]
    UnsupportedCurve,
    #[error("missing or invalid key coordinate")]
    InvalidCoordinate,
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

impl From<coset::CoseError> for CoseError {
    fn from(error: coset::CoseError) -> Self {
        CoseError::Format(error)
    }
}

/// Wrapper around a COSE structure `C` (e.g. [`CoseSign1`]) with the payload
/// type `T` tracked at the type level, so that a signature over an MSO cannot
/// be confused with one over device authentication data.
///
/// Serializes as `C` wrapped in its registered CBOR tag (18 for `COSE_Sign1`);
/// both tagged and untagged values are accepted when deserializing.
#[derive(Debug, Clone)]
pub struct MdocCose<C, T>(pub C, PhantomData<T>);

impl<C, T> From<C> for MdocCose<C, T> {
    fn from(cose: C) -> Self {
        MdocCose(cose, PhantomData)
    }
}

impl<C, T> Serialize for MdocCose<C, T>
where
    C: AsCborValue + TaggedCborSerializable + Clone,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self
            .0
            .clone()
            .to_cbor_value()
            .map_err(ser::Error::custom)?;
        Value::Tag(C::TAG, Box::new(value)).serialize(serializer)
    }
}

impl<'de, C, T> Deserialize<'de> for MdocCose<C, T>
where
    C: AsCborValue + TaggedCborSerializable,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = match Value::deserialize(deserializer)? {
            Value::Tag(tag, inner) if tag == C::TAG => *inner,
            Value::Tag(tag, _) => {
                return Err(de::Error::custom(format!(
                    "unexpected tag {tag}, expected {}",
                    C::TAG
                )))
            }
            untagged => untagged,
        };
        C::from_cbor_value(value)
            .map(MdocCose::from)
            .map_err(de::Error::custom)
    }
}

/// Cloning a COSE structure while attaching or stripping its payload, for
/// verifying detached signatures.
pub trait ClonePayload {
    fn clone_with_payload(&self, bts: Vec<u8>) -> Self;
    fn clone_without_payload(&self) -> Self;
}

impl<T> ClonePayload for MdocCose<CoseSign1, T> {
    fn clone_with_payload(&self, bts: Vec<u8>) -> Self {
        let mut cose = self.0.clone();
        cose.payload = Some(bts);
        cose.into()
    }

    fn clone_without_payload(&self) -> Self {
        let mut cose = self.0.clone();
        cose.payload = None;
        cose.into()
    }
}

impl<T> MdocCose<CoseSign1, T> {
    /// Sign the CBOR serialization of `obj` into a `COSE_Sign1`. The signing
    /// algorithm is recorded in the protected header. With `include_payload`
    /// false the payload is left out of the structure (a "detached" signature)
    /// and must be re-attached with [`ClonePayload::clone_with_payload`]
    /// before verification.
    pub fn sign(
        obj: &T,
        unprotected_header: Header,
        key: &SigningKey,
        include_payload: bool,
    ) -> Result<Self, CoseError>
    where
        T: Serialize,
    {
        let payload = cbor_serialize(obj)?;
        let protected_header = HeaderBuilder::new()
            .algorithm(key.algorithm().cose_algorithm())
            .build();

        let builder = CoseSign1Builder::new()
            .protected(protected_header)
            .unprotected(unprotected_header);

        let cose = if include_payload {
            builder
                .payload(payload)
                .try_create_signature(&[], |data| key.sign(data))?
                .build()
        } else {
            builder
                .try_create_detached_signature(&payload, &[], |data| key.sign(data))?
                .build()
        };

        Ok(cose.into())
    }

    /// Verify the signature over the payload contained in the structure.
    /// The protected header algorithm must be present and agree with the key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), CoseError> {
        if self.0.payload.is_none() {
            return Err(CoseError::MissingPayload);
        }

        let alg = match self.0.protected.header.alg.as_ref() {
            Some(RegisteredLabelWithPrivate::Assigned(alg)) => {
                SignatureAlgorithm::from_cose_algorithm(*alg)
                    .ok_or(CoseError::UnsupportedAlgorithm)?
            }
            Some(_) => return Err(CoseError::UnsupportedAlgorithm),
            None => return Err(CoseError::AlgorithmMissing),
        };
        if alg != key.algorithm() {
            return Err(CoseError::AlgorithmMismatch);
        }

        self.0
            .verify_signature(&[], |signature, data| key.verify(signature, data))
            .map_err(CoseError::Keys)
    }

    /// The payload, parsed as `T` but not verified against the signature.
    pub fn dangerous_parse_unverified(&self) -> Result<T, CoseError>
    where
        T: DeserializeOwned,
    {
        let payload = self.0.payload.as_ref().ok_or(CoseError::MissingPayload)?;
        let parsed = crate::utils::serialization::cbor_deserialize(payload.as_slice())?;
        Ok(parsed)
    }

    /// The certificate chain from the `x5chain` header, leaf first. Both the
    /// single-certificate and the array shape are accepted, in the unprotected
    /// or the protected header.
    pub fn signing_certs(&self) -> Result<Vec<Certificate>, CoseError> {
        let value = [&self.0.unprotected.rest, &self.0.protected.header.rest]
            .into_iter()
            .flatten()
            .find(|(label, _)| *label == Label::Int(COSE_X5CHAIN_HEADER_LABEL))
            .map(|(_, value)| value)
            .ok_or(CoseError::X5ChainMissing)?;

        match value {
            Value::Bytes(bts) => Ok(vec![Certificate::from(bts.clone())]),
            Value::Array(certs) => certs
                .iter()
                .map(|cert| match cert {
                    Value::Bytes(bts) => Ok(Certificate::from(bts.clone())),
                    _ => Err(CoseError::MalformedX5Chain),
                })
                .collect(),
            _ => Err(CoseError::MalformedX5Chain),
        }
    }

    /// The certificate that signed this structure, i.e. the x5chain leaf.
    pub fn signing_cert(&self) -> Result<Certificate, CoseError> {
        let mut certs = self.signing_certs()?;
        if certs.is_empty() {
            return Err(CoseError::X5ChainMissing);
        }
        Ok(certs.swap_remove(0))
    }

    /// Verify the signature against the public key of the x5chain leaf
    /// certificate and parse the payload. When `trust_anchors` is nonempty the
    /// certificate chain is additionally verified against them, requiring the
    /// extended key usage of `usage`.
    pub fn verify_against_trust_anchors(
        &self,
        usage: CertificateUsage,
        time: &impl Generator<DateTime<Utc>>,
        trust_anchors: &[TrustAnchor],
    ) -> Result<T, CoseError>
    where
        T: DeserializeOwned,
    {
        let chain = self.signing_certs()?;
        let leaf = chain.first().ok_or(CoseError::X5ChainMissing)?;

        if !trust_anchors.is_empty() {
            let intermediates: Vec<&[u8]> =
                chain[1..].iter().map(Certificate::as_bytes).collect();
            leaf.verify(usage, &intermediates, time, trust_anchors)?;
        }

        self.verify(&leaf.public_key()?)?;
        self.dangerous_parse_unverified()
    }
}

/// Unprotected header carrying the signer's certificate chain in `x5chain`:
/// a single byte string for a chain of one, an array of byte strings otherwise.
pub fn new_certificate_header(chain: &[Certificate]) -> Header {
    let value = match chain {
        [single] => Value::Bytes(single.as_bytes().to_vec()),
        many => Value::Array(
            many.iter()
                .map(|cert| Value::Bytes(cert.as_bytes().to_vec()))
                .collect(),
        ),
    };
    HeaderBuilder::new()
        .value(COSE_X5CHAIN_HEADER_LABEL, value)
        .build()
}

/// Wrapper around [`coset::CoseKey`] implementing (de)serialization and
/// conversion to and from the crate's verifying keys.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseKey(pub coset::CoseKey);

impl From<coset::CoseKey> for CoseKey {
    fn from(key: coset::CoseKey) -> Self {
        CoseKey(key)
    }
}

impl Serialize for CoseKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoseKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        coset::CoseKey::from_cbor_value(value)
            .map(CoseKey)
            .map_err(de::Error::custom)
    }
}

impl CoseKey {
    pub(crate) fn ec2_parameter(&self, parameter: iana::Ec2KeyParameter) -> Option<&Value> {
        self.parameter(parameter.to_i64())
    }

    pub(crate) fn okp_parameter(&self, parameter: iana::OkpKeyParameter) -> Option<&Value> {
        self.parameter(parameter.to_i64())
    }

    fn parameter(&self, label: i64) -> Option<&Value> {
        self.0
            .params
            .iter()
            .find(|(key, _)| *key == Label::Int(label))
            .map(|(_, value)| value)
    }

    pub(crate) fn curve(&self) -> Option<iana::EllipticCurve> {
        let crv = match self.0.kty {
            coset::RegisteredLabel::Assigned(iana::KeyType::EC2) => {
                self.ec2_parameter(iana::Ec2KeyParameter::Crv)
            }
            coset::RegisteredLabel::Assigned(iana::KeyType::OKP) => {
                self.okp_parameter(iana::OkpKeyParameter::Crv)
            }
            _ => None,
        }?;
        iana::EllipticCurve::from_i64(i64::try_from(crv.as_integer()?).ok()?)
    }
}

fn ec2_coordinate(value: Option<&Value>, len: usize) -> Result<Vec<u8>, CoseError> {
    match value {
        Some(Value::Bytes(bts)) if bts.len() == len => Ok(bts.clone()),
        _ => Err(CoseError::InvalidCoordinate),
    }
}

impl TryFrom<&CoseKey> for VerifyingKey {
    type Error = CoseError;

    fn try_from(key: &CoseKey) -> Result<Self, Self::Error> {
        let curve = key.curve().ok_or(CoseError::UnsupportedCurve)?;
        match curve {
            iana::EllipticCurve::P_256 => {
                let x = ec2_coordinate(key.ec2_parameter(iana::Ec2KeyParameter::X), 32)?;
                let y = ec2_coordinate(key.ec2_parameter(iana::Ec2KeyParameter::Y), 32)?;
                let point = p256::EncodedPoint::from_affine_coordinates(
                    p256::FieldBytes::from_slice(&x),
                    p256::FieldBytes::from_slice(&y),
                    false,
                );
                p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map(VerifyingKey::Es256)
                    .map_err(|_| CoseError::InvalidCoordinate)
            }
            iana::EllipticCurve::P_384 => {
                let x = ec2_coordinate(key.ec2_parameter(iana::Ec2KeyParameter::X), 48)?;
                let y = ec2_coordinate(key.ec2_parameter(iana::Ec2KeyParameter::Y), 48)?;
                let point = p384::EncodedPoint::from_affine_coordinates(
                    p384::FieldBytes::from_slice(&x),
                    p384::FieldBytes::from_slice(&y),
                    false,
                );
                p384::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map(VerifyingKey::Es384)
                    .map_err(|_| CoseError::InvalidCoordinate)
            }
            iana::EllipticCurve::P_521 => {
                let x = ec2_coordinate(key.ec2_parameter(iana::Ec2KeyParameter::X), 66)?;
                let y = ec2_coordinate(key.ec2_parameter(iana::Ec2KeyParameter::Y), 66)?;
                let point = p521::EncodedPoint::from_affine_coordinates(
                    p521::FieldBytes::from_slice(&x),
                    p521::FieldBytes::from_slice(&y),
                    false,
                );
                p521::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map(VerifyingKey::Es512)
                    .map_err(|_| CoseError::InvalidCoordinate)
            }
            iana::EllipticCurve::Ed25519 => {
                let x = ec2_coordinate(key.okp_parameter(iana::OkpKeyParameter::X), 32)?;
                let bts: [u8; 32] = x.try_into().map_err(|_| CoseError::InvalidCoordinate)?;
                ed25519_dalek::VerifyingKey::from_bytes(&bts)
                    .map(VerifyingKey::EdDsa)
                    .map_err(|_| CoseError::InvalidCoordinate)
            }
            _ => Err(CoseError::UnsupportedCurve),
        }
    }
}

impl TryFrom<&VerifyingKey> for CoseKey {
    type Error = CoseError;

    fn try_from(key: &VerifyingKey) -> Result<Self, Self::Error> {
        let cose_key = match key {
            VerifyingKey::Es256(key) => {
                let point = key.to_encoded_point(false);
                let (x, y) = (
                    point.x().ok_or(CoseError::InvalidCoordinate)?,
                    point.y().ok_or(CoseError::InvalidCoordinate)?,
                );
                coset::CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_256,
                    x.to_vec(),
                    y.to_vec(),
                )
                .build()
            }
            VerifyingKey::Es384(key) => {
                let point = key.to_encoded_point(false);
                let (x, y) = (
                    point.x().ok_or(CoseError::InvalidCoordinate)?,
                    point.y().ok_or(CoseError::InvalidCoordinate)?,
                );
                coset::CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_384,
                    x.to_vec(),
                    y.to_vec(),
                )
                .build()
            }
            VerifyingKey::Es512(key) => {
                let point = key.to_encoded_point(false);
                let (x, y) = (
                    point.x().ok_or(CoseError::InvalidCoordinate)?,
                    point.y().ok_or(CoseError::InvalidCoordinate)?,
                );
                coset::CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_521,
                    x.to_vec(),
                    y.to_vec(),
                )
                .build()
            }
            VerifyingKey::EdDsa(key) => coset::CoseKey {
                kty: coset::RegisteredLabel::Assigned(iana::KeyType::OKP),
                params: vec![
                    (
                        Label::Int(iana::OkpKeyParameter::Crv.to_i64()),
                        Value::from(iana::EllipticCurve::Ed25519.to_i64()),
                    ),
                    (
                        Label::Int(iana::OkpKeyParameter::X.to_i64()),
                        Value::Bytes(key.to_bytes().to_vec()),
                    ),
                ],
                ..Default::default()
            },
        };
        Ok(cose_key.into())
    }
}
