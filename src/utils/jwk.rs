//! JSON Web Keys (RFC 7517), the key format accepted at the crate's edges,
//! and their conversion to and from COSE keys.

use base64::prelude::*;
use ciborium::value::Value;
use coset::{
    iana::{self, EnumI64},
    Label, RegisteredLabel, RegisteredLabelWithPrivate,
};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::utils::{
    cose::{CoseError, CoseKey},
    crypto::sha256,
    keys::{SigningKey, VerifyingKey},
};

#[derive(thiserror::Error, Debug)]
pub enum JwkError {
    #[error("unsupported JWK key type: {0}")]
    UnsupportedKeyType(String),
    #[error("unsupported JWK curve: {0}")]
    UnsupportedCurve(String),
    #[error("unsupported JWK algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("missing JWK member: {0}")]
    MissingMember(&'static str),
    #[error("base64url decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("key identifier is not valid UTF-8")]
    InvalidKeyId,
    #[error("malformed key material")]
    MalformedKey,
    #[error("COSE key conversion failed: {0}")]
    Cose(#[from] CoseError),
}

/// A JSON Web Key, restricted to the EC and OKP key types used by mdocs.
/// Binary members are base64url without padding.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: Option<String>,
    pub d: Option<String>,
    pub alg: Option<String>,
    pub kid: Option<String>,
}

fn crv_to_cose(crv: &str) -> Result<iana::EllipticCurve, JwkError> {
    match crv {
        "P-256" => Ok(iana::EllipticCurve::P_256),
        "P-384" => Ok(iana::EllipticCurve::P_384),
        "P-521" => Ok(iana::EllipticCurve::P_521),
        "Ed25519" => Ok(iana::EllipticCurve::Ed25519),
        "Ed448" => Ok(iana::EllipticCurve::Ed448),
        other => Err(JwkError::UnsupportedCurve(other.to_string())),
    }
}

fn crv_from_cose(crv: iana::EllipticCurve) -> Result<&'static str, JwkError> {
    match crv {
        iana::EllipticCurve::P_256 => Ok("P-256"),
        iana::EllipticCurve::P_384 => Ok("P-384"),
        iana::EllipticCurve::P_521 => Ok("P-521"),
        iana::EllipticCurve::Ed25519 => Ok("Ed25519"),
        iana::EllipticCurve::Ed448 => Ok("Ed448"),
        other => Err(JwkError::UnsupportedCurve(format!("{other:?}"))),
    }
}

fn alg_to_cose(alg: &str) -> Result<iana::Algorithm, JwkError> {
    match alg {
        "ES256" => Ok(iana::Algorithm::ES256),
        "ES384" => Ok(iana::Algorithm::ES384),
        "ES512" => Ok(iana::Algorithm::ES512),
        "EdDSA" => Ok(iana::Algorithm::EdDSA),
        other => Err(JwkError::UnsupportedAlgorithm(other.to_string())),
    }
}

fn alg_from_cose(alg: iana::Algorithm) -> Result<&'static str, JwkError> {
    match alg {
        iana::Algorithm::ES256 => Ok("ES256"),
        iana::Algorithm::ES384 => Ok("ES384"),
        iana::Algorithm::ES512 => Ok("ES512"),
        iana::Algorithm::EdDSA => Ok("EdDSA"),
        other => Err(JwkError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

fn decode_member(name: &'static str, value: Option<&str>) -> Result<Vec<u8>, JwkError> {
    let value = value.ok_or(JwkError::MissingMember(name))?;
    Ok(BASE64_URL_SAFE_NO_PAD.decode(value)?)
}

impl Jwk {
    /// The RFC 7638 thumbprint: SHA-256 over the canonical JSON containing
    /// only the required members, in lexicographic order.
    pub fn thumbprint(&self) -> Result<Vec<u8>, JwkError> {
        let mut members = serde_json::Map::new();
        members.insert("crv".to_string(), self.crv.clone().into());
        members.insert("kty".to_string(), self.kty.clone().into());
        members.insert("x".to_string(), self.x.clone().into());
        if self.kty == "EC" {
            let y = self.y.as_ref().ok_or(JwkError::MissingMember("y"))?;
            members.insert("y".to_string(), y.clone().into());
        }
        let preimage = serde_json::to_vec(&serde_json::Value::Object(members))?;
        Ok(sha256(&preimage))
    }
}

impl TryFrom<&Jwk> for CoseKey {
    type Error = JwkError;

    fn try_from(jwk: &Jwk) -> Result<Self, Self::Error> {
        let crv = crv_to_cose(&jwk.crv)?;

        let mut params = vec![];
        let kty = match jwk.kty.as_str() {
            "EC" => {
                params.push((
                    Label::Int(iana::Ec2KeyParameter::Crv.to_i64()),
                    Value::from(crv.to_i64()),
                ));
                params.push((
                    Label::Int(iana::Ec2KeyParameter::X.to_i64()),
                    Value::Bytes(decode_member("x", Some(&jwk.x))?),
                ));
                params.push((
                    Label::Int(iana::Ec2KeyParameter::Y.to_i64()),
                    Value::Bytes(decode_member("y", jwk.y.as_deref())?),
                ));
                if let Some(d) = &jwk.d {
                    params.push((
                        Label::Int(iana::Ec2KeyParameter::D.to_i64()),
                        Value::Bytes(decode_member("d", Some(d))?),
                    ));
                }
                iana::KeyType::EC2
            }
            "OKP" => {
                params.push((
                    Label::Int(iana::OkpKeyParameter::Crv.to_i64()),
                    Value::from(crv.to_i64()),
                ));
                params.push((
                    Label::Int(iana::OkpKeyParameter::X.to_i64()),
                    Value::Bytes(decode_member("x", Some(&jwk.x))?),
                ));
                if let Some(d) = &jwk.d {
                    params.push((
                        Label::Int(iana::OkpKeyParameter::D.to_i64()),
                        Value::Bytes(decode_member("d", Some(d))?),
                    ));
                }
                iana::KeyType::OKP
            }
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        let key = coset::CoseKey {
            kty: RegisteredLabel::Assigned(kty),
            alg: jwk
                .alg
                .as_deref()
                .map(|alg| Ok::<_, JwkError>(RegisteredLabelWithPrivate::Assigned(alg_to_cose(alg)?)))
                .transpose()?,
            key_id: jwk
                .kid
                .as_deref()
                .map(|kid| kid.as_bytes().to_vec())
                .unwrap_or_default(),
            params,
            ..Default::default()
        };
        Ok(key.into())
    }
}

impl TryFrom<&CoseKey> for Jwk {
    type Error = JwkError;

    fn try_from(key: &CoseKey) -> Result<Self, Self::Error> {
        let crv = key
            .curve()
            .ok_or_else(|| JwkError::UnsupportedCurve("missing".to_string()))?;

        let bytes_param = |value: Option<&Value>| -> Option<String> {
            match value {
                Some(Value::Bytes(bts)) => Some(BASE64_URL_SAFE_NO_PAD.encode(bts)),
                _ => None,
            }
        };

        let (kty, x, y, d) = match key.0.kty {
            RegisteredLabel::Assigned(iana::KeyType::EC2) => (
                "EC",
                bytes_param(key.ec2_parameter(iana::Ec2KeyParameter::X))
                    .ok_or(JwkError::MissingMember("x"))?,
                Some(
                    bytes_param(key.ec2_parameter(iana::Ec2KeyParameter::Y))
                        .ok_or(JwkError::MissingMember("y"))?,
                ),
                bytes_param(key.ec2_parameter(iana::Ec2KeyParameter::D)),
            ),
            RegisteredLabel::Assigned(iana::KeyType::OKP) => (
                "OKP",
                bytes_param(key.okp_parameter(iana::OkpKeyParameter::X))
                    .ok_or(JwkError::MissingMember("x"))?,
                None,
                bytes_param(key.okp_parameter(iana::OkpKeyParameter::D)),
            ),
            _ => return Err(JwkError::UnsupportedKeyType(format!("{:?}", key.0.kty))),
        };

        let alg = match &key.0.alg {
            Some(RegisteredLabelWithPrivate::Assigned(alg)) => Some(alg_from_cose(*alg)?.to_string()),
            Some(other) => return Err(JwkError::UnsupportedAlgorithm(format!("{other:?}"))),
            None => None,
        };
        let kid = match key.0.key_id.is_empty() {
            true => None,
            false => Some(
                String::from_utf8(key.0.key_id.clone()).map_err(|_| JwkError::InvalidKeyId)?,
            ),
        };

        Ok(Jwk {
            kty: kty.to_string(),
            crv: crv_from_cose(crv)?.to_string(),
            x,
            y,
            d,
            alg,
            kid,
        })
    }
}

impl TryFrom<&Jwk> for VerifyingKey {
    type Error = JwkError;

    fn try_from(jwk: &Jwk) -> Result<Self, Self::Error> {
        let cose_key = CoseKey::try_from(jwk)?;
        Ok(VerifyingKey::try_from(&cose_key)?)
    }
}

impl TryFrom<&Jwk> for SigningKey {
    type Error = JwkError;

    fn try_from(jwk: &Jwk) -> Result<Self, Self::Error> {
        let d = decode_member("d", jwk.d.as_deref())?;
        match jwk.crv.as_str() {
            "P-256" => p256::ecdsa::SigningKey::from_slice(&d)
                .map(SigningKey::Es256)
                .map_err(|_| JwkError::MalformedKey),
            "P-384" => p384::ecdsa::SigningKey::from_slice(&d)
                .map(SigningKey::Es384)
                .map_err(|_| JwkError::MalformedKey),
            "P-521" => p521::ecdsa::SigningKey::from_slice(&d)
                .map(SigningKey::Es512)
                .map_err(|_| JwkError::MalformedKey),
            "Ed25519" => {
                let seed: [u8; 32] = d.try_into().map_err(|_| JwkError::MalformedKey)?;
                Ok(SigningKey::EdDsa(ed25519_dalek::SigningKey::from_bytes(
                    &seed,
                )))
            }
            other => Err(JwkError::UnsupportedCurve(other.to_string())),
        }
    }
}

impl TryFrom<&VerifyingKey> for Jwk {
    type Error = JwkError;

    fn try_from(key: &VerifyingKey) -> Result<Self, Self::Error> {
        let cose_key = CoseKey::try_from(key)?;
        Jwk::try_from(&cose_key)
    }
}

impl Jwk {
    /// The JWK of a private signing key, including the private member `d`.
    pub fn from_signing_key(key: &SigningKey) -> Result<Self, JwkError> {
        let mut jwk = Jwk::try_from(&key.verifying_key())?;
        let d = match key {
            SigningKey::Es256(key) => key.to_bytes().to_vec(),
            SigningKey::Es384(key) => key.to_bytes().to_vec(),
            SigningKey::Es512(key) => key.to_bytes().to_vec(),
            SigningKey::EdDsa(key) => key.to_bytes().to_vec(),
        };
        jwk.d = Some(BASE64_URL_SAFE_NO_PAD.encode(d));
        Ok(jwk)
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;
    use rstest::rstest;

    use crate::utils::keys::SignatureAlgorithm;

    use super::*;

    #[rstest]
    #[case(SignatureAlgorithm::Es256, "P-256")]
    #[case(SignatureAlgorithm::Es384, "P-384")]
    #[case(SignatureAlgorithm::Es512, "P-521")]
    #[case(SignatureAlgorithm::EdDsa, "Ed25519")]
    fn jwk_round_trip(#[case] alg: SignatureAlgorithm, #[case] crv: &str) {
        let key = SigningKey::random(alg, &mut OsRng);
        let mut jwk = Jwk::from_signing_key(&key).unwrap();
        jwk.kid = Some("key-1".to_string());
        assert_eq!(jwk.crv, crv);

        // JWK -> COSE_Key -> JWK is lossless.
        let cose_key = CoseKey::try_from(&jwk).unwrap();
        assert_eq!(Jwk::try_from(&cose_key).unwrap(), jwk);

        // The private part parses back into the same signing key.
        let signing_key = SigningKey::try_from(&jwk).unwrap();
        assert_eq!(signing_key.verifying_key(), key.verifying_key());

        // The public part parses into the corresponding verifying key.
        assert_eq!(VerifyingKey::try_from(&jwk).unwrap(), key.verifying_key());
    }

    #[test]
    fn unsupported_curve_is_rejected() {
        let jwk = Jwk {
            kty: "EC".to_string(),
            crv: "P-999".to_string(),
            x: "AA".to_string(),
            y: Some("AA".to_string()),
            d: None,
            alg: None,
            kid: None,
        };
        assert!(matches!(
            CoseKey::try_from(&jwk),
            Err(JwkError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn ed448_converts_but_does_not_verify() {
        let jwk = Jwk {
            kty: "OKP".to_string(),
            crv: "Ed448".to_string(),
            x: BASE64_URL_SAFE_NO_PAD.encode([0u8; 57]),
            y: None,
            d: None,
            alg: None,
            kid: None,
        };

        // The key format maps to COSE and back.
        let cose_key = CoseKey::try_from(&jwk).unwrap();
        assert_eq!(Jwk::try_from(&cose_key).unwrap(), jwk);

        // There is no signature algorithm for it.
        assert!(matches!(
            VerifyingKey::try_from(&jwk),
            Err(JwkError::Cose(CoseError::UnsupportedCurve))
        ));
    }

    #[test]
    fn thumbprint_matches_rfc_8037_example() {
        let jwk = Jwk {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo".to_string(),
            y: None,
            d: None,
            alg: None,
            kid: None,
        };
        assert_eq!(
            BASE64_URL_SAFE_NO_PAD.encode(jwk.thumbprint().unwrap()),
            "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k",
        );
    }
}
