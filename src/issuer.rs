//! Issuance of mdocs: salting and digest-ID assignment of the attributes,
//! assembly of the Mobile Security Object, and the issuer signature over it.

use indexmap::IndexMap;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::{
    iso::{
        disclosure::IssuerSigned,
        mdocs::{
            Attributes, DataElementIdentifier, DataElementValue, DigestAlgorithm, DigestIDs,
            DocType, IssuerNameSpaces, IssuerSignedItem, MobileSecurityObject, NameSpace,
            ValidityInfo, ValueDigests,
        },
    },
    utils::{
        cose::{new_certificate_header, CoseError, CoseKey, MdocCose},
        crypto::{cbor_digest, random_bytes},
        jwk::{Jwk, JwkError},
        keys::KeyPair,
        serialization::{CborError, TaggedBytes},
    },
};

/// Length of the random salt in every issuer-signed item. The standard
/// requires at least 16 bytes.
const ATTRIBUTE_RANDOM_LENGTH: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum IssuanceError {
    #[error("no namespaces to sign")]
    EmptyNameSpaces,
    #[error("namespace {0} contains no attributes")]
    EmptyElements(NameSpace),
    #[error("device key error: {0}")]
    DeviceKey(#[from] JwkError),
    #[error("signing the MSO failed: {0}")]
    SigningFailed(#[from] CoseError),
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
}

/// An mdoc that is yet to be signed: the attributes to certify, grouped per
/// namespace, plus the validity window the issuer will assert.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedMdoc {
    pub doc_type: DocType,
    pub validity_info: ValidityInfo,
    pub attributes: IndexMap<NameSpace, Vec<Entry>>,
}

/// An attribute name and value.
///
/// See also [`IssuerSignedItem`], which additionally contains the attribute's
/// `random` and `digestID`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: DataElementIdentifier,
    pub value: DataElementValue,
}

impl From<&Attributes> for Vec<Entry> {
    fn from(attrs: &Attributes) -> Self {
        attrs
            .as_ref()
            .iter()
            .map(|item| Entry {
                name: item.as_inner().element_identifier.clone(),
                value: item.as_inner().element_value.clone(),
            })
            .collect()
    }
}

impl Attributes {
    /// Issuer-signed items for the attributes of one namespace: digest IDs
    /// assigned from 0 in entry order, fresh random salts, and the item
    /// encodings pinned so that the digests commit to these exact bytes.
    fn try_from_entries(
        entries: Vec<Entry>,
        rng: &mut impl CryptoRngCore,
    ) -> Result<Attributes, CborError> {
        let items = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let item = IssuerSignedItem {
                    digest_id: index as u64,
                    random: ByteBuf::from(random_bytes(rng, ATTRIBUTE_RANDOM_LENGTH)),
                    element_identifier: entry.name,
                    element_value: entry.value,
                };
                TaggedBytes::new(item).freeze()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items.into())
    }
}

impl ValueDigests {
    /// Digests over the encoded issuer-signed items, grouped per namespace and
    /// keyed by digest ID.
    pub fn new(
        name_spaces: &IssuerNameSpaces,
        alg: DigestAlgorithm,
    ) -> Result<ValueDigests, CborError> {
        let digests = name_spaces
            .iter()
            .map(|(namespace, attrs)| {
                let ids = attrs
                    .as_ref()
                    .iter()
                    .map(|item| {
                        Ok((
                            item.as_inner().digest_id,
                            ByteBuf::from(cbor_digest(alg, item)?),
                        ))
                    })
                    .collect::<Result<IndexMap<_, _>, CborError>>()?;
                Ok((namespace.clone(), DigestIDs(ids)))
            })
            .collect::<Result<IndexMap<_, _>, CborError>>()?;
        Ok(ValueDigests(digests))
    }
}

impl IssuerSigned {
    /// Sign `unsigned` into an [`IssuerSigned`]: produce a salted issuer-signed
    /// item for every attribute, commit to all of them in a Mobile Security
    /// Object that also fixes the holder's device key and the validity window,
    /// and sign that with the issuer key. The issuer's certificate chain ends
    /// up in the `x5chain` header.
    pub fn sign(
        unsigned: UnsignedMdoc,
        digest_algorithm: DigestAlgorithm,
        device_public_key: &Jwk,
        key: &KeyPair,
        rng: &mut impl CryptoRngCore,
    ) -> Result<IssuerSigned, IssuanceError> {
        if unsigned.attributes.is_empty() {
            return Err(IssuanceError::EmptyNameSpaces);
        }
        if let Some(namespace) = unsigned
            .attributes
            .iter()
            .find_map(|(namespace, entries)| entries.is_empty().then(|| namespace.clone()))
        {
            return Err(IssuanceError::EmptyElements(namespace));
        }

        let name_spaces = unsigned
            .attributes
            .into_iter()
            .map(|(namespace, entries)| {
                let attrs = Attributes::try_from_entries(entries, rng)?;
                Ok((namespace, attrs))
            })
            .collect::<Result<IssuerNameSpaces, CborError>>()?;

        let mso = MobileSecurityObject {
            version: MobileSecurityObject::VERSION.to_string(),
            digest_algorithm,
            value_digests: ValueDigests::new(&name_spaces, digest_algorithm)?,
            device_key_info: CoseKey::try_from(device_public_key)?.into(),
            doc_type: unsigned.doc_type,
            validity_info: unsigned.validity_info,
        };

        let header = new_certificate_header(key.certificate_chain());
        let mso_tagged = TaggedBytes::new(mso).freeze()?;
        let issuer_auth = MdocCose::sign(&mso_tagged, header, key.signing_key(), true)?;

        Ok(IssuerSigned {
            name_spaces,
            issuer_auth,
        })
    }
}

#[cfg(all(test, feature = "generate"))]
mod tests {
    use chrono::{Duration, Utc};
    use ciborium::value::Value;
    use rand_core::OsRng;

    use crate::utils::{
        keys::{SignatureAlgorithm, SigningKey},
        x509::{Certificate, CertificateUsage},
    };

    use super::*;

    fn issuer_key() -> KeyPair {
        let (ca, ca_key) = Certificate::new_ca("ca.issuer.example.com").unwrap();
        let (cert, key) =
            Certificate::new(&ca, &ca_key, "cert.issuer.example.com", CertificateUsage::Mdl)
                .unwrap();
        KeyPair::new(key, vec![cert, ca]).unwrap()
    }

    fn device_jwk() -> Jwk {
        let key = SigningKey::random(SignatureAlgorithm::Es256, &mut OsRng);
        Jwk::try_from(&key.verifying_key()).unwrap()
    }

    fn unsigned(attributes: IndexMap<NameSpace, Vec<Entry>>) -> UnsignedMdoc {
        let now = Utc::now();
        UnsignedMdoc {
            doc_type: "example_doctype".to_string(),
            validity_info: ValidityInfo {
                signed: now.into(),
                valid_from: now.into(),
                valid_until: (now + Duration::days(365)).into(),
                expected_update: None,
            },
            attributes,
        }
    }

    fn entry(name: &str, value: &str) -> Entry {
        Entry {
            name: name.to_string(),
            value: Value::Text(value.to_string()),
        }
    }

    #[test]
    fn sign_assigns_digest_ids_per_namespace() {
        let attributes = IndexMap::from([
            (
                "namespace_1".to_string(),
                vec![entry("first_name", "John"), entry("family_name", "Doe")],
            ),
            ("namespace_2".to_string(), vec![entry("country", "NL")]),
        ]);

        let issuer_signed = IssuerSigned::sign(
            unsigned(attributes),
            DigestAlgorithm::Sha256,
            &device_jwk(),
            &issuer_key(),
            &mut OsRng,
        )
        .unwrap();

        // Digest IDs start at 0 in each namespace, in attribute order.
        let first = &issuer_signed.name_spaces["namespace_1"];
        assert_eq!(
            first
                .as_ref()
                .iter()
                .map(|item| item.as_inner().digest_id)
                .collect::<Vec<_>>(),
            [0, 1],
        );
        let second = &issuer_signed.name_spaces["namespace_2"];
        assert_eq!(second.as_ref()[0].as_inner().digest_id, 0);

        // The MSO commits to every item with the digest of its pinned encoding.
        let mso = issuer_signed
            .issuer_auth
            .dangerous_parse_unverified()
            .unwrap()
            .into_inner();
        assert_eq!(mso.version, MobileSecurityObject::VERSION);
        for (namespace, attrs) in &issuer_signed.name_spaces {
            let digests = &mso.value_digests.0[namespace];
            assert_eq!(digests.0.len(), attrs.as_ref().len());
            for item in attrs.as_ref() {
                assert_eq!(
                    digests.0[&item.as_inner().digest_id].as_ref() as &[u8],
                    cbor_digest(DigestAlgorithm::Sha256, item).unwrap(),
                );
                assert!(item.as_inner().random.len() >= 16);
            }
        }
    }

    #[test]
    fn sign_rejects_empty_input() {
        assert!(matches!(
            IssuerSigned::sign(
                unsigned(IndexMap::new()),
                DigestAlgorithm::Sha256,
                &device_jwk(),
                &issuer_key(),
                &mut OsRng,
            ),
            Err(IssuanceError::EmptyNameSpaces)
        ));

        let attributes = IndexMap::from([("namespace".to_string(), vec![])]);
        assert!(matches!(
            IssuerSigned::sign(
                unsigned(attributes),
                DigestAlgorithm::Sha256,
                &device_jwk(),
                &issuer_key(),
                &mut OsRng,
            ),
            Err(IssuanceError::EmptyElements(_))
        ));
    }
}
