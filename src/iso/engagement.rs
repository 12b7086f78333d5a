//! Data structures that bind a disclosure to the exchange in which it
//! happens: the session transcript with its handover variants, the engagement
//! structures it refers to, and the [`DeviceAuthentication`] signed by the
//! holder's device.

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::skip_serializing_none;
use url::Url;

use crate::{
    iso::{disclosure::DeviceNameSpacesBytes, mdocs::DocType},
    utils::{
        cose::{CoseError, CoseKey},
        crypto::sha256,
        jwk::{Jwk, JwkError},
        keys::VerifyingKey,
        serialization::{
            cbor_serialize, CborError, CborIntMap, CborSeq, DeviceAuthenticationString,
            OpenId4VpDcApiHandoverString, RequiredValue, TaggedBytes,
        },
    },
};

/// The structure that the holder's device signs when disclosing attributes:
/// a transcript of the session so far, acting as the challenge of a
/// challenge-response protocol, plus the attributes the device asserts by
/// itself. Computed independently by holder and verifier, never transmitted.
pub type DeviceAuthentication = CborSeq<DeviceAuthenticationKeyed>;

/// See [`DeviceAuthentication`]. These bytes are the detached payload of the
/// device signature.
pub type DeviceAuthenticationBytes = TaggedBytes<DeviceAuthentication>;

/// See [`DeviceAuthentication`].
#[derive(Serialize, Debug, Clone)]
pub struct DeviceAuthenticationKeyed {
    pub device_authentication: RequiredValue<DeviceAuthenticationString>,
    pub session_transcript: SessionTranscript,
    pub doc_type: DocType,
    pub device_name_spaces_bytes: DeviceNameSpacesBytes,
}

impl DeviceAuthenticationKeyed {
    pub fn new(
        doc_type: &str,
        session_transcript: &SessionTranscript,
        device_name_spaces_bytes: DeviceNameSpacesBytes,
    ) -> Self {
        DeviceAuthenticationKeyed {
            device_authentication: Default::default(),
            session_transcript: session_transcript.clone(),
            doc_type: doc_type.to_string(),
            device_name_spaces_bytes,
        }
    }

    /// The detached payload bytes over which the device signature is computed.
    pub fn challenge(self) -> Result<Vec<u8>, CborError> {
        cbor_serialize(&TaggedBytes::new(CborSeq(self)))
    }
}

/// Transcript of the session so far; the three-element array
/// `[DeviceEngagementBytes / null, EReaderKeyBytes / null, Handover]`.
pub type SessionTranscript = CborSeq<SessionTranscriptKeyed>;

/// See [`SessionTranscript`].
#[derive(Serialize, Debug, Clone)]
pub struct SessionTranscriptKeyed {
    pub device_engagement_bytes: Option<DeviceEngagementBytes>,
    pub ereader_key_bytes: Option<ESenderKeyBytes>,
    pub handover: Handover,
}

/// Transport form of [`SessionTranscript`] as used by the legacy mdoc web API.
pub type SessionTranscriptBytes = TaggedBytes<SessionTranscript>;

#[derive(Debug, thiserror::Error)]
pub enum SessionTranscriptError {
    #[error("reader engagement is missing security information")]
    MissingReaderEngagementSecurity,
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("verifier key error: {0}")]
    Jwk(#[from] JwkError),
}

/// How the holder and the verifier are connected in the mdoc web API: on the
/// same device (the verifier URL was opened on the holder's device) or across
/// devices (the engagement was scanned from a QR code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    SameDevice,
    CrossDevice,
}

impl SessionTranscript {
    /// Session transcript for the mdoc web API, binding the device signature
    /// to the engagement phase of the session.
    pub fn new(
        session_type: SessionType,
        reader_engagement: &ReaderEngagement,
        device_engagement: &DeviceEngagement,
    ) -> Result<Self, SessionTranscriptError> {
        let reader_security = reader_engagement
            .0
            .security
            .as_ref()
            .ok_or(SessionTranscriptError::MissingReaderEngagementSecurity)?;

        let transcript = SessionTranscriptKeyed {
            device_engagement_bytes: Some(TaggedBytes::new(device_engagement.clone()).freeze()?),
            ereader_key_bytes: Some(reader_security.0.e_sender_key_bytes.clone()),
            handover: match session_type {
                SessionType::SameDevice => {
                    Handover::SchemeHandoverBytes(TaggedBytes::new(reader_engagement.clone()).freeze()?)
                }
                SessionType::CrossDevice => Handover::QRHandover,
            },
        }
        .into();

        Ok(transcript)
    }

    /// Session transcript for OpenID4VP over the W3C Digital Credentials API:
    /// `[null, null, ["OpenID4VPDCAPIHandover", hash]]` where the hash commits
    /// to the calling origin, the verifier's nonce, and the thumbprint of the
    /// verifier's encryption key (if any).
    pub fn new_oid4vp_dc_api(
        origin: &str,
        nonce: &str,
        verifier_jwk: Option<&Jwk>,
    ) -> Result<Self, SessionTranscriptError> {
        let jwk_thumbprint = verifier_jwk
            .map(Jwk::thumbprint)
            .transpose()?
            .map(ByteBuf::from);

        let handover_info = CborSeq(Oid4vpDcApiHandoverInfoKeyed {
            origin: origin.to_string(),
            nonce: nonce.to_string(),
            jwk_thumbprint,
        });
        let handover_info_hash = ByteBuf::from(sha256(&cbor_serialize(&handover_info)?));

        let transcript = SessionTranscriptKeyed {
            device_engagement_bytes: None,
            ereader_key_bytes: None,
            handover: Handover::Oid4vpDcApiHandover(CborSeq(Oid4vpDcApiHandoverKeyed {
                handover_type: Default::default(),
                handover_info_hash,
            })),
        }
        .into();

        Ok(transcript)
    }
}

/// The handover element of a [`SessionTranscript`]: how the session came to
/// be, binding the engagement channel. Serde's untagged representation
/// serializes the variant contents directly (the QR handover is null).
#[derive(Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum Handover {
    QRHandover,
    NFCHandover(CborSeq<NFCHandover>),
    SchemeHandoverBytes(TaggedBytes<ReaderEngagement>),
    Oid4vpDcApiHandover(CborSeq<Oid4vpDcApiHandoverKeyed>),
}

#[derive(Serialize, Debug, Clone)]
pub struct NFCHandover {
    pub handover_select_message: ByteBuf,
    pub handover_request_message: Option<ByteBuf>,
}

/// `["OpenID4VPDCAPIHandover", SHA-256(OpenID4VPDCAPIHandoverInfo)]`.
#[derive(Serialize, Debug, Clone)]
pub struct Oid4vpDcApiHandoverKeyed {
    pub handover_type: RequiredValue<OpenId4VpDcApiHandoverString>,
    pub handover_info_hash: ByteBuf,
}

/// `[origin, nonce, jwkThumbprint / null]`; hashed into the DC API handover.
#[derive(Serialize, Debug, Clone)]
pub struct Oid4vpDcApiHandoverInfoKeyed {
    pub origin: String,
    pub nonce: String,
    pub jwk_thumbprint: Option<ByteBuf>,
}

/// Describes how the verifier can connect to the holder.
pub type DeviceEngagement = CborIntMap<Engagement>;

/// Describes how the holder can connect to the verifier.
pub type ReaderEngagement = CborIntMap<Engagement>;

pub type DeviceEngagementBytes = TaggedBytes<DeviceEngagement>;

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Engagement {
    pub version: EngagementVersion,
    pub security: Option<Security>,
    pub connection_methods: Option<ConnectionMethods>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum EngagementVersion {
    #[serde(rename = "1.0")]
    V1_0,
}

pub type Security = CborSeq<SecurityKeyed>;

/// The ephemeral public key with which an end-to-end encrypted channel would
/// be established.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SecurityKeyed {
    pub cipher_suite_identifier: CipherSuiteIdentifier,
    pub e_sender_key_bytes: ESenderKeyBytes,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Clone)]
#[repr(u8)]
pub enum CipherSuiteIdentifier {
    P256 = 1,
}

/// Available connection methods; called DeviceRetrievalMethods in ISO 18013-5.
pub type ConnectionMethods = Vec<ConnectionMethod>;

pub type ConnectionMethod = CborSeq<ConnectionMethodKeyed>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionMethodKeyed {
    pub typ: ConnectionMethodType,
    pub version: ConnectionMethodVersion,
    pub connection_options: CborSeq<RestApiOptionsKeyed>,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Clone)]
#[repr(u8)]
pub enum ConnectionMethodType {
    RestApi = 4,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Clone)]
#[repr(u8)]
pub enum ConnectionMethodVersion {
    RestApi = 1,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RestApiOptionsKeyed {
    pub uri: Url,
}

/// Transport form of the ephemeral session key of one of the parties.
pub type ESenderKeyBytes = TaggedBytes<CoseKey>;

fn ephemeral_security(
    rng: &mut impl CryptoRngCore,
) -> Result<(Security, p256::SecretKey), CoseError> {
    let secret_key = p256::SecretKey::random(rng);
    let public_key = VerifyingKey::Es256(secret_key.public_key().into());
    let security = CborSeq(SecurityKeyed {
        cipher_suite_identifier: CipherSuiteIdentifier::P256,
        e_sender_key_bytes: TaggedBytes::new(CoseKey::try_from(&public_key)?)
            .freeze()
            .map_err(CoseError::Cbor)?,
    });
    Ok((security, secret_key))
}

impl CborIntMap<Engagement> {
    /// New reader engagement for the given verifier URL, with a fresh P-256
    /// ephemeral key. Returns the engagement and the private key.
    pub fn new_reader_engagement(
        verifier_url: Url,
        rng: &mut impl CryptoRngCore,
    ) -> Result<(ReaderEngagement, p256::SecretKey), CoseError> {
        let (security, secret_key) = ephemeral_security(rng)?;
        let engagement = Engagement {
            version: EngagementVersion::V1_0,
            security: Some(security),
            connection_methods: Some(vec![CborSeq(ConnectionMethodKeyed {
                typ: ConnectionMethodType::RestApi,
                version: ConnectionMethodVersion::RestApi,
                connection_options: CborSeq(RestApiOptionsKeyed { uri: verifier_url }),
            })]),
        };
        Ok((engagement.into(), secret_key))
    }

    /// New device engagement with a fresh P-256 ephemeral key. Returns the
    /// engagement and the private key.
    pub fn new_device_engagement(
        rng: &mut impl CryptoRngCore,
    ) -> Result<(DeviceEngagement, p256::SecretKey), CoseError> {
        let (security, secret_key) = ephemeral_security(rng)?;
        let engagement = Engagement {
            version: EngagementVersion::V1_0,
            security: Some(security),
            connection_methods: None,
        };
        Ok((engagement.into(), secret_key))
    }
}

#[cfg(test)]
mod tests {
    use ciborium::value::Value;
    use hex_literal::hex;
    use rand_core::OsRng;

    use crate::utils::{keys::SigningKey, keys::SignatureAlgorithm, serialization::cbor_deserialize};

    use super::*;

    const ORIGIN: &str = "https://example.com";
    const NONCE: &str = "exc7gBkxjx1rdc9udRrveKvSsJIq80avlXeLHhGwqtA";

    #[test]
    fn dc_api_transcript_has_the_normative_shape() {
        let transcript = SessionTranscript::new_oid4vp_dc_api(ORIGIN, NONCE, None).unwrap();
        let bts = cbor_serialize(&transcript).unwrap();

        // [null, null, ["OpenID4VPDCAPIHandover", bstr .size 32]]
        assert_eq!(
            bts[..29],
            hex!("83 F6 F6 82 76 4F70656E4944345650444341504948616E646F766572 5820")
        );
        assert_eq!(bts.len(), 29 + 32);
    }

    #[test]
    fn dc_api_transcript_commits_to_all_inputs() {
        let jwk = Jwk::from_signing_key(&SigningKey::random(SignatureAlgorithm::Es256, &mut OsRng))
            .unwrap();

        let base = cbor_serialize(&SessionTranscript::new_oid4vp_dc_api(ORIGIN, NONCE, None).unwrap())
            .unwrap();
        let same = cbor_serialize(&SessionTranscript::new_oid4vp_dc_api(ORIGIN, NONCE, None).unwrap())
            .unwrap();
        assert_eq!(base, same);

        for other in [
            SessionTranscript::new_oid4vp_dc_api("https://other.example.com", NONCE, None).unwrap(),
            SessionTranscript::new_oid4vp_dc_api(ORIGIN, "other-nonce", None).unwrap(),
            SessionTranscript::new_oid4vp_dc_api(ORIGIN, NONCE, Some(&jwk)).unwrap(),
        ] {
            assert_ne!(cbor_serialize(&other).unwrap(), base);
        }
    }

    #[test]
    fn dc_api_handover_info_encodes_missing_thumbprint_as_null() {
        let info = CborSeq(Oid4vpDcApiHandoverInfoKeyed {
            origin: ORIGIN.to_string(),
            nonce: NONCE.to_string(),
            jwk_thumbprint: None,
        });
        let bts = cbor_serialize(&info).unwrap();
        assert_eq!(bts[0], 0x83);
        assert_eq!(bts[bts.len() - 1], 0xF6);
    }

    #[test]
    fn web_api_transcript_shapes() {
        let (reader_engagement, _) =
            ReaderEngagement::new_reader_engagement("https://example.com/session".parse().unwrap(), &mut OsRng)
                .unwrap();
        let (device_engagement, _) =
            DeviceEngagement::new_device_engagement(&mut OsRng).unwrap();

        let same_device =
            SessionTranscript::new(SessionType::SameDevice, &reader_engagement, &device_engagement)
                .unwrap();
        let cross_device =
            SessionTranscript::new(SessionType::CrossDevice, &reader_engagement, &device_engagement)
                .unwrap();

        for (transcript, qr) in [(&same_device, false), (&cross_device, true)] {
            let value: Value = cbor_deserialize(&cbor_serialize(transcript).unwrap()).unwrap();
            let Value::Array(elements) = value else {
                panic!("expected array");
            };
            assert_eq!(elements.len(), 3);
            assert!(matches!(&elements[0], Value::Tag(24, _)));
            assert!(matches!(&elements[1], Value::Tag(24, _)));
            match (&elements[2], qr) {
                (Value::Null, true) => (),
                (Value::Tag(24, _), false) => (),
                other => panic!("unexpected handover: {other:?}"),
            }
        }
    }

    #[test]
    fn device_authentication_has_the_context_string() {
        let transcript = SessionTranscript::new_oid4vp_dc_api(ORIGIN, NONCE, None).unwrap();
        let device_auth = DeviceAuthenticationKeyed::new(
            "org.iso.18013.5.1.mDL",
            &transcript,
            Default::default(),
        );

        let bts = cbor_serialize(&CborSeq(device_auth)).unwrap();
        let value: Value = cbor_deserialize(&bts).unwrap();
        let Value::Array(elements) = value else {
            panic!("expected array");
        };
        assert_eq!(elements.len(), 4);
        assert_eq!(
            elements[0].as_text().unwrap(),
            "DeviceAuthentication"
        );
        assert_eq!(elements[2].as_text().unwrap(), "org.iso.18013.5.1.mDL");
    }
}
