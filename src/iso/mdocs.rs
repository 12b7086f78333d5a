//! Data structures containing mdoc attributes and the issuer's commitment to
//! them: [`IssuerSignedItem`], the digest maps, and the
//! [`MobileSecurityObject`] signed by the issuer.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ciborium::{tag, value::Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use serde_with::skip_serializing_none;

use crate::utils::{cose::CoseKey, serialization::TaggedBytes};

/// Document type of an mdoc, e.g. `"org.iso.18013.5.1.mDL"`.
pub type DocType = String;

/// Namespace within a document type, e.g. `"org.iso.18013.5.1"`.
pub type NameSpace = String;

/// Name of an attribute within a namespace.
pub type DataElementIdentifier = String;

/// Value of an attribute; any CBOR value.
pub type DataElementValue = Value;

/// Identifier of an attribute digest within a namespace. Unique per
/// namespace, but not required to be consecutive.
pub type DigestID = u64;

/// Document type and namespace of the ISO 18013-5 mobile driver's license.
pub const MDL_DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";

/// An attribute as signed by the issuer: its value plus the digest ID and
/// random salt with which it is committed to in the MSO.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: DigestID,
    pub random: ByteBuf,
    #[serde(rename = "elementIdentifier")]
    pub element_identifier: DataElementIdentifier,
    #[serde(rename = "elementValue")]
    pub element_value: DataElementValue,
}

/// The transport form of an [`IssuerSignedItem`]: embedded CBOR, whose exact
/// bytes are the input to the digest recorded in the MSO.
pub type IssuerSignedItemBytes = TaggedBytes<IssuerSignedItem>;

/// The issuer-signed attributes of a single namespace, in issuance order.
#[derive(Serialize, Deserialize, Debug, Clone, derive_more::AsRef)]
pub struct Attributes(pub Vec<IssuerSignedItemBytes>);

impl From<Vec<IssuerSignedItemBytes>> for Attributes {
    fn from(items: Vec<IssuerSignedItemBytes>) -> Self {
        Attributes(items)
    }
}

/// All issuer-signed attributes of an mdoc, grouped per namespace.
pub type IssuerNameSpaces = IndexMap<NameSpace, Attributes>;

/// Per-namespace attribute digests: the issuer's commitment to the attribute
/// values, contained in the MSO.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ValueDigests(pub IndexMap<NameSpace, DigestIDs>);

/// Digests of the attributes within a namespace, keyed by digest ID.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DigestIDs(pub IndexMap<DigestID, ByteBuf>);

/// Digest algorithm used for the attribute digests in the MSO.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

/// The Mobile Security Object: the payload of the issuer's signature,
/// committing to the attributes through their digests, to the device key, and
/// to the validity window.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MobileSecurityObject {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: ValueDigests,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: DocType,
    pub validity_info: ValidityInfo,
}

impl MobileSecurityObject {
    pub const VERSION: &'static str = "1.0";
}

/// See [`MobileSecurityObject`]; this is its transport form, the payload of
/// the issuer's `COSE_Sign1`.
pub type MobileSecurityObjectBytes = TaggedBytes<MobileSecurityObject>;

/// The public key with which the holder's device authenticates disclosures of
/// this mdoc, plus optionally the attributes it may authenticate by itself.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
    pub key_authorizations: Option<KeyAuthorizations>,
    pub key_info: Option<IndexMap<i64, Value>>,
}

impl From<CoseKey> for DeviceKeyInfo {
    fn from(device_key: CoseKey) -> Self {
        DeviceKeyInfo {
            device_key,
            key_authorizations: None,
            key_info: None,
        }
    }
}

/// Namespaces and attributes that the device key may sign by itself
/// (self-asserted attributes).
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KeyAuthorizations {
    pub name_spaces: Option<Vec<NameSpace>>,
    pub data_elements: Option<IndexMap<NameSpace, Vec<DataElementIdentifier>>>,
}

/// Validity window of an mdoc, in signing order: when it was signed, from and
/// until when it is valid, and optionally when the issuer expects to update it.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidityInfo {
    pub signed: Tdate,
    pub valid_from: Tdate,
    pub valid_until: Tdate,
    pub expected_update: Option<Tdate>,
}

/// An RFC 3339 date-time, normalized to UTC without fractional seconds, as a
/// CBOR Tag 0 text string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tdate(pub tag::Required<String, 0>);

impl Tdate {
    pub fn now() -> Self {
        Utc::now().into()
    }

    pub fn as_str(&self) -> &str {
        &self.0 .0
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Tdate {
    fn from(t: DateTime<Tz>) -> Self {
        Tdate(tag::Required(
            t.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ))
    }
}

impl TryFrom<&Tdate> for DateTime<Utc> {
    type Error = chrono::ParseError;

    fn try_from(t: &Tdate) -> Result<Self, Self::Error> {
        let parsed = DateTime::parse_from_rfc3339(&t.0 .0)?;
        Ok(parsed.with_timezone(&Utc))
    }
}

impl From<&Tdate> for DataElementValue {
    fn from(t: &Tdate) -> Self {
        Value::Tag(0, Box::new(Value::Text(t.0 .0.clone())))
    }
}

/// A full-date (`YYYY-MM-DD`), as a CBOR Tag 1004 text string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FullDate(pub tag::Required<String, 1004>);

impl FullDate {
    pub fn as_str(&self) -> &str {
        &self.0 .0
    }
}

impl From<NaiveDate> for FullDate {
    fn from(date: NaiveDate) -> Self {
        FullDate(tag::Required(date.format("%Y-%m-%d").to_string()))
    }
}

impl TryFrom<&FullDate> for NaiveDate {
    type Error = chrono::ParseError;

    fn try_from(date: &FullDate) -> Result<Self, Self::Error> {
        NaiveDate::parse_from_str(&date.0 .0, "%Y-%m-%d")
    }
}

impl From<&FullDate> for DataElementValue {
    fn from(date: &FullDate) -> Self {
        Value::Tag(1004, Box::new(Value::Text(date.0 .0.clone())))
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use crate::utils::serialization::{cbor_deserialize, cbor_serialize};

    use super::*;

    #[test]
    fn tdate_normalizes_to_utc_without_fractional_seconds() {
        let date = DateTime::parse_from_rfc3339("2024-03-20T15:30:45.123Z").unwrap();
        assert_eq!(Tdate::from(date).as_str(), "2024-03-20T15:30:45Z");

        let date = DateTime::parse_from_rfc3339("2024-03-20T15:30:00+09:00").unwrap();
        assert_eq!(Tdate::from(date).as_str(), "2024-03-20T06:30:00Z");
    }

    #[test]
    fn tdate_round_trip() {
        let date = Utc.with_ymd_and_hms(2024, 3, 20, 15, 30, 45).unwrap();
        let tdate = Tdate::from(date);
        assert_eq!(DateTime::<Utc>::try_from(&tdate).unwrap(), date);

        let bts = cbor_serialize(&tdate).unwrap();
        // Tag 0 followed by a 20-character text string.
        assert_eq!(bts[..2], hex!("C0 74"));
        assert_eq!(cbor_deserialize::<Tdate>(&bts).unwrap(), tdate);
    }

    #[test]
    fn full_date_round_trip() {
        let date = FullDate::from(NaiveDate::from_ymd_opt(2007, 3, 25).unwrap());
        assert_eq!(date.as_str(), "2007-03-25");

        let bts = cbor_serialize(&date).unwrap();
        // Tag 1004 followed by a 10-character text string.
        assert_eq!(bts[..4], hex!("D903EC 6A"));
        assert_eq!(cbor_deserialize::<FullDate>(&bts).unwrap(), date);
    }

    #[test]
    fn issuer_signed_item_field_names() {
        let item = IssuerSignedItem {
            digest_id: 0,
            random: ByteBuf::from(vec![0; 16]),
            element_identifier: "family_name".to_string(),
            element_value: Value::Text("Jones".to_string()),
        };

        let value = Value::serialized(&item).unwrap();
        let Value::Map(entries) = value else {
            panic!("expected map");
        };
        let keys: Vec<_> = entries
            .iter()
            .map(|(key, _)| key.as_text().unwrap().to_string())
            .collect();
        assert_eq!(
            keys,
            ["digestID", "random", "elementIdentifier", "elementValue"]
        );
    }
}
