//! Data structures with which a holder discloses attributes to a verifier:
//! [`DeviceResponse`] and everything inside it.

use coset::{CoseMac0, CoseSign1};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    iso::{
        engagement::DeviceAuthenticationBytes,
        mdocs::{
            DataElementIdentifier, DataElementValue, DocType, IssuerNameSpaces,
            MobileSecurityObjectBytes, NameSpace,
        },
    },
    utils::{cose::MdocCose, serialization::TaggedBytes},
};

/// A disclosure of one or more documents to a verifier, and the top-level
/// mdoc wire format.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub version: String,
    pub documents: Option<Vec<Document>>,
    pub document_errors: Option<Vec<DocumentError>>,
    pub status: u64,
}

impl DeviceResponse {
    pub const VERSION: &'static str = "1.0";

    pub const STATUS_OK: u64 = 0;
    pub const STATUS_GENERAL_ERROR: u64 = 10;
    pub const STATUS_CBOR_DECODING_ERROR: u64 = 11;
    pub const STATUS_CBOR_VALIDATION_ERROR: u64 = 12;

    pub fn from_documents(documents: Vec<Document>) -> Self {
        DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: Some(documents),
            document_errors: None,
            status: DeviceResponse::STATUS_OK,
        }
    }
}

/// Per-document error codes in a [`DeviceResponse`] whose documents could not
/// be returned.
pub type DocumentError = IndexMap<DocType, i64>;

/// A single disclosed document: the issuer-signed attributes with their MSO,
/// and the device's signature binding the disclosure to the session.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub doc_type: DocType,
    pub issuer_signed: IssuerSigned,
    pub device_signed: DeviceSigned,
    pub errors: Option<Errors>,
}

/// Per-attribute error codes of a [`Document`].
pub type Errors = IndexMap<NameSpace, IndexMap<DataElementIdentifier, i64>>;

/// The issuer-signed part of an mdoc: attributes (possibly a selectively
/// disclosed subset) and the issuer's signature over the MSO.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    pub name_spaces: IssuerNameSpaces,
    pub issuer_auth: IssuerAuth,
}

/// The issuer's `COSE_Sign1` over the MSO, with its certificate chain in the
/// `x5chain` header.
pub type IssuerAuth = MdocCose<CoseSign1, MobileSecurityObjectBytes>;

/// The device-signed part of a disclosed document: self-asserted attributes
/// (if any) and the device's authentication over the session transcript.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    pub name_spaces: DeviceNameSpacesBytes,
    pub device_auth: DeviceAuth,
}

/// Attributes asserted by the device itself, not by the issuer.
pub type DeviceNameSpaces = IndexMap<NameSpace, DeviceSignedItems>;

/// Device-asserted attributes within a single namespace.
pub type DeviceSignedItems = IndexMap<DataElementIdentifier, DataElementValue>;

/// Transport form of [`DeviceNameSpaces`]. These exact bytes are part of the
/// detached payload over which the device signature is computed.
pub type DeviceNameSpacesBytes = TaggedBytes<DeviceNameSpaces>;

/// The device's authentication of a disclosure: a signature with the key
/// committed to in the MSO, or a MAC. Only the signature variant is supported
/// by the verifier in this crate.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuth {
    DeviceSignature(DeviceSignature),
    DeviceMac(MdocCose<CoseMac0, DeviceAuthenticationBytes>),
}

/// The device's `COSE_Sign1` over the [`DeviceAuthenticationBytes`], with a
/// detached payload: the payload field on the wire is null, and both sides
/// reconstruct the signed bytes from the session transcript.
pub type DeviceSignature = MdocCose<CoseSign1, DeviceAuthenticationBytes>;
