//! Verification of disclosed documents, see [`DeviceResponse::verify()`].
//!
//! Verification of a document proceeds in phases, failing on the first fault:
//! structural checks with field-specific errors (done when parsing with
//! [`DeviceResponse::parse()`]), the issuer signature and certificate chain,
//! the doctype and attribute digests against the MSO, the device signature
//! over the reconstructed session transcript, and finally the validity window.

use chrono::{DateTime, Duration, Utc};
use ciborium::value::Value;
use derive_more::AsRef;
use indexmap::{IndexMap, IndexSet};
use rustls_pki_types::TrustAnchor;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    errors::Result,
    identifiers::{AttributeIdentifier, AttributeIdentifierHolder},
    iso::{
        device_retrieval::ItemsRequest,
        disclosure::{DeviceAuth, DeviceResponse, Document, DocumentError, IssuerSigned},
        engagement::{DeviceAuthenticationKeyed, SessionTranscript},
        mdocs::{
            Attributes, DataElementIdentifier, DataElementValue, DigestID, DocType,
            IssuerSignedItemBytes, MobileSecurityObject, MobileSecurityObjectBytes, NameSpace,
            ValidityInfo,
        },
    },
    utils::{
        cose::CoseError,
        crypto::cbor_digest,
        generator::Generator,
        keys::VerifyingKey,
        serialization::cbor_deserialize,
        x509::{CertificateError, CertificateUsage},
    },
};

/// Default tolerated clock difference between issuer and verifier when
/// checking the validity window, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 60;

/// Attributes of an mdoc that were disclosed in a [`DeviceResponse`], as
/// computed by [`DeviceResponse::verify()`]. Grouped per namespace; the
/// issuer's and CA's common names and the validity window are included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDisclosedAttributes {
    pub attributes: IndexMap<NameSpace, IndexMap<DataElementIdentifier, DataElementValue>>,
    pub issuer: String,
    pub ca: String,
    pub validity_info: ValidityInfo,
}

/// All attributes that were disclosed in a [`DeviceResponse`], grouped per
/// doctype.
pub type DisclosedAttributes = IndexMap<DocType, DocumentDisclosedAttributes>;

/// Fields whose absence in a device response is reported with a distinct
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum RequiredField {
    Version,
    DocType,
    IssuerSigned,
    IssuerNameSpaces,
    IssuerAuth,
    DeviceSigned,
    DeviceNameSpaces,
    DeviceAuth,
    DeviceSignature,
    DigestAlgorithm,
    ValueDigests,
    DeviceKeyInfo,
    ValidityInfo,
    Signed,
    ValidFrom,
    ValidUntil,
}

#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("errors in device response: {0:#?}")]
    DeviceResponseErrors(Vec<DocumentError>),
    #[error("unexpected status: {0}")]
    UnexpectedStatus(u64),
    #[error("required field missing: {0}")]
    FieldMissing(RequiredField),
    #[error("device authentication with a MAC is not supported")]
    DeviceMacNotSupported,
    #[error("malformed issuer authentication structure")]
    MalformedIssuerSigned,
    #[error("issuer signature invalid: {0}")]
    IssuerSignatureInvalid(#[source] CoseError),
    #[error("certificate chain not trusted: {0}")]
    TrustChainUntrusted(#[source] CertificateError),
    #[error("issuer certificate expired or not yet valid")]
    CertificateExpired,
    #[error("inconsistent doctypes: document contained {document}, MSO contained {mso}")]
    DocTypeMismatch { document: DocType, mso: DocType },
    #[error("namespace {0} not found in MSO valueDigests")]
    ValueDigestsMissingForNamespace(NameSpace),
    #[error("digest ID {digest_id} not found in MSO valueDigests of namespace {namespace}")]
    ValueDigestsMissingForDigestId {
        namespace: NameSpace,
        digest_id: DigestID,
    },
    #[error("attribute digest mismatch: MSO contains {expected}, computed {computed}")]
    MsoDigestMismatch { expected: String, computed: String },
    #[error("random of attribute {0} is shorter than 16 bytes")]
    AttributeRandomTooShort(DataElementIdentifier),
    #[error("device key in MSO cannot be used: {0}")]
    DeviceKeyUnavailable(#[source] CoseError),
    #[error("device signature invalid: {0}")]
    DeviceSignatureInvalid(#[source] CoseError),
    #[error("validity error: {0}")]
    Validity(#[from] ValidityError),
    #[error("requested attributes not disclosed: {0:?}")]
    RequiredClaimMissing(Vec<AttributeIdentifier>),
    #[error("unexpected amount of CA common names in issuer certificate: expected 1, found {0}")]
    UnexpectedCaCommonNameCount(usize),
    #[error("unexpected amount of common names in issuer certificate: expected 1, found {0}")]
    UnexpectedIssuerCommonNameCount(usize),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidityError {
    #[error("validity parsing failed: {0}")]
    ParsingFailed(#[from] chrono::ParseError),
    #[error("not yet valid: valid from {0}")]
    NotYetValid(String),
    #[error("expired at {0}")]
    Expired(String),
}

/// Indicates how a [`ValidityInfo`] should be verified against the current
/// date.
#[derive(Debug, Clone, Copy)]
pub enum ValidityRequirement {
    /// The [`ValidityInfo`] must not be expired, but is allowed to be not yet
    /// valid (e.g. an mdoc that was just issued).
    AllowNotYetValid,
    /// The [`ValidityInfo`] must be valid now and not be expired.
    Valid,
}

impl ValidityInfo {
    pub fn verify_is_valid_at(
        &self,
        time: DateTime<Utc>,
        clock_skew: Duration,
        requirement: ValidityRequirement,
    ) -> std::result::Result<(), ValidityError> {
        let valid_from = DateTime::<Utc>::try_from(&self.valid_from)?;
        let valid_until = DateTime::<Utc>::try_from(&self.valid_until)?;

        if matches!(requirement, ValidityRequirement::Valid) && time < valid_from - clock_skew {
            Err(ValidityError::NotYetValid(self.valid_from.as_str().to_string()))
        } else if time > valid_until + clock_skew {
            Err(ValidityError::Expired(self.valid_until.as_str().to_string()))
        } else {
            Ok(())
        }
    }
}

fn entry<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    match map {
        Value::Map(entries) => entries
            .iter()
            .find(|(entry_key, _)| matches!(entry_key, Value::Text(text) if text == key))
            .map(|(_, value)| value),
        _ => None,
    }
}

fn require<'a>(
    map: &'a Value,
    key: &str,
    field: RequiredField,
) -> std::result::Result<&'a Value, VerificationError> {
    entry(map, key).ok_or(VerificationError::FieldMissing(field))
}

fn check_document_structure(document: &Value) -> std::result::Result<(), VerificationError> {
    require(document, "docType", RequiredField::DocType)?;

    let issuer_signed = require(document, "issuerSigned", RequiredField::IssuerSigned)?;
    let name_spaces = require(issuer_signed, "nameSpaces", RequiredField::IssuerNameSpaces)?;
    if !matches!(name_spaces, Value::Map(entries) if !entries.is_empty()) {
        return Err(VerificationError::FieldMissing(RequiredField::IssuerNameSpaces));
    }
    let issuer_auth = require(issuer_signed, "issuerAuth", RequiredField::IssuerAuth)?;
    check_mso_structure(issuer_auth)?;

    let device_signed = require(document, "deviceSigned", RequiredField::DeviceSigned)?;
    require(device_signed, "nameSpaces", RequiredField::DeviceNameSpaces)?;
    let device_auth = require(device_signed, "deviceAuth", RequiredField::DeviceAuth)?;
    if entry(device_auth, "deviceMac").is_some() {
        return Err(VerificationError::DeviceMacNotSupported);
    }
    require(device_auth, "deviceSignature", RequiredField::DeviceSignature)?;

    Ok(())
}

fn check_mso_structure(issuer_auth: &Value) -> std::result::Result<(), VerificationError> {
    let inner = match issuer_auth {
        Value::Tag(18, inner) => inner.as_ref(),
        untagged => untagged,
    };
    let Value::Array(elements) = inner else {
        return Err(VerificationError::MalformedIssuerSigned);
    };
    let Some(Value::Bytes(payload)) = elements.get(2) else {
        return Err(VerificationError::MalformedIssuerSigned);
    };

    let mso_tagged: Value =
        cbor_deserialize(payload).map_err(|_| VerificationError::MalformedIssuerSigned)?;
    let Value::Tag(24, mso_bytes) = mso_tagged else {
        return Err(VerificationError::MalformedIssuerSigned);
    };
    let Value::Bytes(mso_bytes) = *mso_bytes else {
        return Err(VerificationError::MalformedIssuerSigned);
    };
    let mso: Value =
        cbor_deserialize(&mso_bytes).map_err(|_| VerificationError::MalformedIssuerSigned)?;

    require(&mso, "version", RequiredField::Version)?;
    require(&mso, "digestAlgorithm", RequiredField::DigestAlgorithm)?;
    require(&mso, "valueDigests", RequiredField::ValueDigests)?;
    require(&mso, "deviceKeyInfo", RequiredField::DeviceKeyInfo)?;
    require(&mso, "docType", RequiredField::DocType)?;
    let validity = require(&mso, "validityInfo", RequiredField::ValidityInfo)?;
    require(validity, "signed", RequiredField::Signed)?;
    require(validity, "validFrom", RequiredField::ValidFrom)?;
    require(validity, "validUntil", RequiredField::ValidUntil)?;

    Ok(())
}

impl DeviceResponse {
    /// Decode a [`DeviceResponse`], checking for the presence of all required
    /// fields first and reporting the first missing one with a field-specific
    /// error.
    pub fn parse(bts: &[u8]) -> Result<Self> {
        let value: Value = cbor_deserialize(bts)?;

        require(&value, "version", RequiredField::Version)?;
        if let Some(Value::Array(documents)) = entry(&value, "documents") {
            for document in documents {
                check_document_structure(document)?;
            }
        }

        let response = cbor_deserialize(bts)?;
        Ok(response)
    }

    /// Verify a [`DeviceResponse`] with the default clock skew, returning the
    /// verified attributes grouped per doctype and namespace.
    ///
    /// # Arguments
    /// - `session_transcript` - the transcript of the session under which the
    ///   disclosure was requested; the device signatures must be bound to it.
    /// - `time` - a generator of the current time.
    /// - `trust_anchors` - CA certificates against which the issuer
    ///   certificates are verified; leave empty to skip chain verification.
    pub fn verify(
        &self,
        session_transcript: &SessionTranscript,
        time: &impl Generator<DateTime<Utc>>,
        trust_anchors: &[TrustAnchor],
    ) -> Result<DisclosedAttributes> {
        self.verify_with_clock_skew(
            session_transcript,
            time,
            Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
            trust_anchors,
        )
    }

    /// See [`DeviceResponse::verify()`]; `clock_skew` loosens both edges of
    /// the validity window.
    pub fn verify_with_clock_skew(
        &self,
        session_transcript: &SessionTranscript,
        time: &impl Generator<DateTime<Utc>>,
        clock_skew: Duration,
        trust_anchors: &[TrustAnchor],
    ) -> Result<DisclosedAttributes> {
        if let Some(errors) = &self.document_errors {
            if !errors.is_empty() {
                return Err(VerificationError::DeviceResponseErrors(errors.clone()).into());
            }
        }
        if self.status != DeviceResponse::STATUS_OK {
            return Err(VerificationError::UnexpectedStatus(self.status).into());
        }

        // A response without documents verifies successfully, with no claims.
        let Some(documents) = &self.documents else {
            return Ok(DisclosedAttributes::default());
        };

        let mut attrs = IndexMap::new();
        for doc in documents {
            debug!("verifying document with doc_type: {}", doc.doc_type);
            let (doc_type, doc_attrs) = doc
                .verify(session_transcript, time, clock_skew, trust_anchors)
                .map_err(|error| {
                    warn!("document verification failed: {error}");
                    error
                })?;
            attrs.insert(doc_type, doc_attrs);
            debug!("document OK");
        }

        Ok(attrs)
    }
}

impl Document {
    pub fn verify(
        &self,
        session_transcript: &SessionTranscript,
        time: &impl Generator<DateTime<Utc>>,
        clock_skew: Duration,
        trust_anchors: &[TrustAnchor],
    ) -> Result<(DocType, DocumentDisclosedAttributes)> {
        debug!("verifying issuer signature");
        let mso = self
            .issuer_signed
            .verify_signature(time, trust_anchors)?
            .into_inner();

        debug!("verifying mso.doc_type matches document doc_type");
        if self.doc_type != mso.doc_type {
            return Err(VerificationError::DocTypeMismatch {
                document: self.doc_type.clone(),
                mso: mso.doc_type,
            }
            .into());
        }

        debug!("verifying attribute digests");
        let attributes = self.issuer_signed.verify_digests(&mso)?;

        debug!("verifying device signature");
        self.verify_device_signature(&mso, session_transcript)?;

        debug!("verifying validity window");
        mso.validity_info
            .verify_is_valid_at(time.generate(), clock_skew, ValidityRequirement::Valid)
            .map_err(VerificationError::Validity)?;

        let signing_cert = self
            .issuer_signed
            .issuer_auth
            .signing_cert()
            .map_err(VerificationError::IssuerSignatureInvalid)?;
        let mut ca_cns = signing_cert.issuer_common_names()?;
        if ca_cns.len() != 1 {
            return Err(VerificationError::UnexpectedCaCommonNameCount(ca_cns.len()).into());
        }
        let mut issuer_cns = signing_cert.common_names()?;
        if issuer_cns.len() != 1 {
            return Err(VerificationError::UnexpectedIssuerCommonNameCount(issuer_cns.len()).into());
        }

        let disclosed = DocumentDisclosedAttributes {
            attributes,
            issuer: issuer_cns.pop().unwrap(),
            ca: ca_cns.pop().unwrap(),
            validity_info: mso.validity_info.clone(),
        };
        Ok((mso.doc_type, disclosed))
    }

    /// Verify the device signature against the device key in the MSO, over the
    /// device authentication bytes reconstructed from the session transcript
    /// and the received device namespaces.
    fn verify_device_signature(
        &self,
        mso: &MobileSecurityObject,
        session_transcript: &SessionTranscript,
    ) -> Result<()> {
        use crate::utils::cose::ClonePayload;

        let device_key = VerifyingKey::try_from(&mso.device_key_info.device_key)
            .map_err(VerificationError::DeviceKeyUnavailable)?;

        let device_authentication = DeviceAuthenticationKeyed::new(
            &self.doc_type,
            session_transcript,
            self.device_signed.name_spaces.clone(),
        );
        let challenge = device_authentication.challenge()?;

        match &self.device_signed.device_auth {
            DeviceAuth::DeviceSignature(signature) => {
                signature
                    .clone_with_payload(challenge)
                    .verify(&device_key)
                    .map_err(VerificationError::DeviceSignatureInvalid)?;
            }
            DeviceAuth::DeviceMac(_) => {
                return Err(VerificationError::DeviceMacNotSupported.into());
            }
        }

        Ok(())
    }
}

impl IssuerSigned {
    /// Verify the issuer signature against the public key of the `x5chain`
    /// leaf certificate, and the certificate chain against `trust_anchors`
    /// when any are given. Returns the MSO carried in the payload.
    pub fn verify_signature(
        &self,
        time: &impl Generator<DateTime<Utc>>,
        trust_anchors: &[TrustAnchor],
    ) -> Result<MobileSecurityObjectBytes> {
        let mso = self
            .issuer_auth
            .verify_against_trust_anchors(CertificateUsage::Mdl, time, trust_anchors)
            .map_err(|error| match error {
                CoseError::Certificate(CertificateError::Expired) => {
                    VerificationError::CertificateExpired
                }
                CoseError::Certificate(certificate_error) => {
                    VerificationError::TrustChainUntrusted(certificate_error)
                }
                error => VerificationError::IssuerSignatureInvalid(error),
            })?;
        Ok(mso)
    }

    /// Check every contained attribute against the digests in the MSO,
    /// returning the attributes grouped per namespace.
    pub fn verify_digests(
        &self,
        mso: &MobileSecurityObject,
    ) -> Result<IndexMap<NameSpace, IndexMap<DataElementIdentifier, DataElementValue>>> {
        self.name_spaces
            .iter()
            .map(|(namespace, attrs)| {
                Ok((
                    namespace.clone(),
                    mso.verify_attrs_in_namespace(attrs, namespace)?,
                ))
            })
            .collect()
    }

    /// Full issuer-signed verification: signature, trust chain, digests and
    /// validity.
    pub fn verify(
        &self,
        requirement: ValidityRequirement,
        time: &impl Generator<DateTime<Utc>>,
        clock_skew: Duration,
        trust_anchors: &[TrustAnchor],
    ) -> Result<(
        IndexMap<NameSpace, IndexMap<DataElementIdentifier, DataElementValue>>,
        MobileSecurityObject,
    )> {
        let mso = self.verify_signature(time, trust_anchors)?.into_inner();
        let attrs = self.verify_digests(&mso)?;
        mso.validity_info
            .verify_is_valid_at(time.generate(), clock_skew, requirement)
            .map_err(VerificationError::Validity)?;
        Ok((attrs, mso))
    }
}

impl MobileSecurityObject {
    fn verify_attrs_in_namespace(
        &self,
        attrs: &Attributes,
        namespace: &NameSpace,
    ) -> Result<IndexMap<DataElementIdentifier, DataElementValue>> {
        attrs
            .as_ref()
            .iter()
            .map(|item| {
                self.verify_attr_digest(namespace, item)?;
                Ok((
                    item.as_inner().element_identifier.clone(),
                    item.as_inner().element_value.clone(),
                ))
            })
            .collect()
    }

    /// Given an `IssuerSignedItem`, verify that the digest of its transported
    /// bytes is correctly included in the MSO.
    fn verify_attr_digest(
        &self,
        namespace: &NameSpace,
        item: &IssuerSignedItemBytes,
    ) -> Result<()> {
        let inner = item.as_inner();
        if inner.random.len() < 16 {
            return Err(
                VerificationError::AttributeRandomTooShort(inner.element_identifier.clone()).into(),
            );
        }

        let digest = self
            .value_digests
            .0
            .get(namespace)
            .ok_or_else(|| VerificationError::ValueDigestsMissingForNamespace(namespace.clone()))?
            .0
            .get(&inner.digest_id)
            .ok_or_else(|| VerificationError::ValueDigestsMissingForDigestId {
                namespace: namespace.clone(),
                digest_id: inner.digest_id,
            })?;

        let computed = cbor_digest(self.digest_algorithm, item)?;
        if computed != digest.as_ref() as &[u8] {
            return Err(VerificationError::MsoDigestMismatch {
                expected: hex::encode(digest),
                computed: hex::encode(computed),
            }
            .into());
        }
        Ok(())
    }
}

/// The [`ItemsRequest`]s of a device request, for matching a received
/// [`DeviceResponse`] against what was asked.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, AsRef)]
pub struct ItemsRequests(pub Vec<ItemsRequest>);

impl From<Vec<ItemsRequest>> for ItemsRequests {
    fn from(items_requests: Vec<ItemsRequest>) -> Self {
        Self(items_requests)
    }
}

impl ItemsRequests {
    /// Checks that all requested attributes are disclosed in `device_response`.
    pub fn match_against_response(&self, device_response: &DeviceResponse) -> Result<()> {
        let missing: Vec<_> = self
            .0
            .iter()
            .flat_map(|items_request| {
                device_response
                    .documents
                    .as_ref()
                    .and_then(|docs| docs.iter().find(|doc| doc.doc_type == items_request.doc_type))
                    .map_or_else(
                        // If the entire document is missing then all requested
                        // attributes are missing.
                        || items_request.attribute_identifiers().into_iter().collect::<Vec<_>>(),
                        |doc| items_request.difference(doc).into_iter().collect(),
                    )
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::RequiredClaimMissing(missing).into())
        }
    }
}

impl AttributeIdentifierHolder for Document {
    fn attribute_identifiers(&self) -> IndexSet<AttributeIdentifier> {
        self.issuer_signed
            .name_spaces
            .iter()
            .flat_map(|(namespace, attrs)| {
                attrs.as_ref().iter().map(|item| AttributeIdentifier {
                    doc_type: self.doc_type.clone(),
                    namespace: namespace.clone(),
                    attribute: item.as_inner().element_identifier.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use coset::CoseSign1;
    use serde_bytes::ByteBuf;

    use crate::{
        errors::Error,
        iso::{
            disclosure::{DeviceSigned, IssuerAuth},
            mdocs::{IssuerSignedItem, Tdate},
        },
        utils::serialization::{cbor_serialize, TaggedBytes},
    };

    use super::*;

    fn new_validity_info(from_days: i64, until_days: i64) -> ValidityInfo {
        let now = Utc::now();
        ValidityInfo {
            signed: now.into(),
            valid_from: (now + Duration::days(from_days)).into(),
            valid_until: (now + Duration::days(until_days)).into(),
            expected_update: None,
        }
    }

    #[test]
    fn validity_info_windows() {
        let now = Utc::now();
        let skew = Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS);

        let validity = new_validity_info(-1, 1);
        validity
            .verify_is_valid_at(now, skew, ValidityRequirement::Valid)
            .unwrap();

        let validity = new_validity_info(-2, -1);
        assert_matches!(
            validity.verify_is_valid_at(now, skew, ValidityRequirement::Valid),
            Err(ValidityError::Expired(_))
        );
        assert_matches!(
            validity.verify_is_valid_at(now, skew, ValidityRequirement::AllowNotYetValid),
            Err(ValidityError::Expired(_))
        );

        let validity = new_validity_info(1, 2);
        assert_matches!(
            validity.verify_is_valid_at(now, skew, ValidityRequirement::Valid),
            Err(ValidityError::NotYetValid(_))
        );
        validity
            .verify_is_valid_at(now, skew, ValidityRequirement::AllowNotYetValid)
            .unwrap();
    }

    #[test]
    fn validity_clock_skew_boundaries() {
        let skew = Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS);
        let valid_from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let valid_until = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let validity = ValidityInfo {
            signed: valid_from.into(),
            valid_from: valid_from.into(),
            valid_until: valid_until.into(),
            expected_update: None,
        };

        // Just inside the skewed window on both edges.
        validity
            .verify_is_valid_at(valid_from - skew, skew, ValidityRequirement::Valid)
            .unwrap();
        validity
            .verify_is_valid_at(valid_until + skew, skew, ValidityRequirement::Valid)
            .unwrap();

        // One second outside.
        assert_matches!(
            validity.verify_is_valid_at(
                valid_from - skew - Duration::seconds(1),
                skew,
                ValidityRequirement::Valid,
            ),
            Err(ValidityError::NotYetValid(_))
        );
        assert_matches!(
            validity.verify_is_valid_at(
                valid_until + skew + Duration::seconds(1),
                skew,
                ValidityRequirement::Valid,
            ),
            Err(ValidityError::Expired(_))
        );
    }

    /// An MSO committing to nothing, wrapped in an unsigned `IssuerAuth`,
    /// structurally complete for [`DeviceResponse::parse()`].
    fn empty_issuer_auth() -> IssuerAuth {
        let mso = MobileSecurityObject {
            version: MobileSecurityObject::VERSION.to_string(),
            digest_algorithm: crate::iso::mdocs::DigestAlgorithm::Sha256,
            value_digests: Default::default(),
            device_key_info: crate::utils::cose::CoseKey(coset::CoseKey::default()).into(),
            doc_type: "doc_type".to_string(),
            validity_info: ValidityInfo {
                signed: Tdate::now(),
                valid_from: Tdate::now(),
                valid_until: Tdate::now(),
                expected_update: None,
            },
        };
        let payload = cbor_serialize(&TaggedBytes::new(mso)).unwrap();
        let cose = CoseSign1 {
            payload: Some(payload),
            ..Default::default()
        };
        cose.into()
    }

    fn example_document(doc_type: &str, namespace: &str, attributes: &[&str]) -> Document {
        let items = attributes
            .iter()
            .enumerate()
            .map(|(index, name)| {
                TaggedBytes::new(IssuerSignedItem {
                    digest_id: index as u64,
                    random: ByteBuf::from(vec![0; 32]),
                    element_identifier: name.to_string(),
                    element_value: Value::Text("value".to_string()),
                })
            })
            .collect::<Vec<_>>();

        Document {
            doc_type: doc_type.to_string(),
            issuer_signed: IssuerSigned {
                name_spaces: IndexMap::from([(namespace.to_string(), items.into())]),
                issuer_auth: empty_issuer_auth(),
            },
            device_signed: DeviceSigned {
                name_spaces: Default::default(),
                device_auth: DeviceAuth::DeviceSignature(CoseSign1::default().into()),
            },
            errors: None,
        }
    }

    #[test]
    fn parse_reports_the_first_missing_field() {
        let document = example_document("doc_type", "namespace", &["attr"]);
        let response = DeviceResponse::from_documents(vec![document]);
        let bts = cbor_serialize(&response).unwrap();

        // The complete response parses.
        DeviceResponse::parse(&bts).unwrap();

        // Removing a field from the document makes parsing fail with the
        // corresponding error.
        let cases: &[(&str, RequiredField)] = &[
            ("docType", RequiredField::DocType),
            ("issuerSigned", RequiredField::IssuerSigned),
            ("deviceSigned", RequiredField::DeviceSigned),
        ];
        for (field, expected) in cases {
            let mut value: Value = cbor_deserialize(bts.as_slice()).unwrap();
            remove_field(&mut value, &["documents", "0"], field);
            let mutated = cbor_serialize(&value).unwrap();
            assert_matches!(
                DeviceResponse::parse(&mutated),
                Err(Error::Verification(VerificationError::FieldMissing(field)))
                    if field == *expected
            );
        }

        // Same for nested fields.
        let mut value: Value = cbor_deserialize(bts.as_slice()).unwrap();
        remove_field(&mut value, &["documents", "0", "issuerSigned"], "issuerAuth");
        assert_matches!(
            DeviceResponse::parse(&cbor_serialize(&value).unwrap()),
            Err(Error::Verification(VerificationError::FieldMissing(
                RequiredField::IssuerAuth
            )))
        );

        let mut value: Value = cbor_deserialize(bts.as_slice()).unwrap();
        remove_field(&mut value, &["documents", "0", "deviceSigned"], "deviceAuth");
        assert_matches!(
            DeviceResponse::parse(&cbor_serialize(&value).unwrap()),
            Err(Error::Verification(VerificationError::FieldMissing(
                RequiredField::DeviceAuth
            )))
        );
    }

    #[test]
    fn parse_rejects_device_mac() {
        let document = example_document("doc_type", "namespace", &["attr"]);
        let response = DeviceResponse::from_documents(vec![document]);
        let mut value: Value =
            cbor_deserialize(cbor_serialize(&response).unwrap().as_slice()).unwrap();

        // Add a deviceMac entry next to the existing deviceSignature.
        let device_auth = navigate(&mut value, &["documents", "0", "deviceSigned", "deviceAuth"]);
        let Value::Map(entries) = device_auth else {
            panic!("expected map");
        };
        entries.push((
            Value::Text("deviceMac".to_string()),
            Value::Array(vec![]),
        ));

        assert_matches!(
            DeviceResponse::parse(&cbor_serialize(&value).unwrap()),
            Err(Error::Verification(VerificationError::DeviceMacNotSupported))
        );
    }

    fn navigate<'a>(value: &'a mut Value, path: &[&str]) -> &'a mut Value {
        let mut current = value;
        for segment in path {
            current = match current {
                Value::Array(elements) => &mut elements[segment.parse::<usize>().unwrap()],
                Value::Map(entries) => {
                    &mut entries
                        .iter_mut()
                        .find(|(key, _)| matches!(key, Value::Text(text) if text == segment))
                        .unwrap()
                        .1
                }
                _ => panic!("cannot navigate into {current:?}"),
            };
        }
        current
    }

    fn remove_field(value: &mut Value, path: &[&str], field: &str) {
        let target = navigate(value, path);
        let Value::Map(entries) = target else {
            panic!("expected map");
        };
        entries.retain(|(key, _)| !matches!(key, Value::Text(text) if text == field));
    }

    #[test]
    fn items_requests_match_against_response() {
        let document = example_document("doc_type", "namespace", &["attr_1", "attr_2"]);
        let response = DeviceResponse::from_documents(vec![document]);

        let request = |attributes: &[&str]| -> ItemsRequests {
            vec![ItemsRequest {
                doc_type: "doc_type".to_string(),
                name_spaces: IndexMap::from([(
                    "namespace".to_string(),
                    attributes.iter().map(|attr| (attr.to_string(), false)).collect(),
                )]),
                request_info: None,
            }]
            .into()
        };

        request(&["attr_1", "attr_2"])
            .match_against_response(&response)
            .unwrap();
        request(&["attr_1"]).match_against_response(&response).unwrap();

        let missing = request(&["attr_1", "attr_3"])
            .match_against_response(&response)
            .unwrap_err();
        assert_matches!(
            missing,
            Error::Verification(VerificationError::RequiredClaimMissing(attrs))
                if attrs.iter().map(ToString::to_string).collect::<Vec<_>>() == ["doc_type/namespace/attr_3"]
        );
    }

    #[test]
    fn response_without_documents_verifies_empty() {
        let response = DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: None,
            document_errors: None,
            status: DeviceResponse::STATUS_OK,
        };
        let transcript =
            SessionTranscript::new_oid4vp_dc_api("https://example.com", "nonce", None).unwrap();

        let disclosed = response
            .verify(&transcript, &crate::utils::generator::TimeGenerator, &[])
            .unwrap();
        assert!(disclosed.is_empty());
    }

    #[test]
    fn response_with_error_status_is_rejected() {
        let mut response = DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: None,
            document_errors: None,
            status: DeviceResponse::STATUS_GENERAL_ERROR,
        };
        let transcript =
            SessionTranscript::new_oid4vp_dc_api("https://example.com", "nonce", None).unwrap();

        assert_matches!(
            response.verify(&transcript, &crate::utils::generator::TimeGenerator, &[]),
            Err(Error::Verification(VerificationError::UnexpectedStatus(10)))
        );

        response.status = DeviceResponse::STATUS_OK;
        response.document_errors = Some(vec![IndexMap::from([("doc_type".to_string(), 0i64)])]);
        assert_matches!(
            response.verify(&transcript, &crate::utils::generator::TimeGenerator, &[]),
            Err(Error::Verification(VerificationError::DeviceResponseErrors(_)))
        );
    }
}
