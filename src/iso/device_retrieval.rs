//! Data structures with which a verifier requests attributes from a holder.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use ciborium::value::Value;

use crate::{
    identifiers::{AttributeIdentifier, AttributeIdentifierHolder},
    iso::mdocs::{DataElementIdentifier, DocType, NameSpace},
    utils::serialization::TaggedBytes,
};

/// A verifier's request for attributes, one [`ItemsRequest`] per document.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub version: String,
    pub doc_requests: Vec<DocRequest>,
}

impl DeviceRequest {
    pub const VERSION: &'static str = "1.0";

    pub fn new(items_requests: Vec<ItemsRequest>) -> Self {
        DeviceRequest {
            version: DeviceRequest::VERSION.to_string(),
            doc_requests: items_requests
                .into_iter()
                .map(|items_request| DocRequest {
                    items_request: items_request.into(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocRequest {
    pub items_request: ItemsRequestBytes,
}

pub type ItemsRequestBytes = TaggedBytes<ItemsRequest>;

/// Requested attributes for a single document: per namespace the attribute
/// names, each with an "intent to retain" flag.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemsRequest {
    pub doc_type: DocType,
    pub name_spaces: IndexMap<NameSpace, IndexMap<DataElementIdentifier, bool>>,
    pub request_info: Option<IndexMap<String, Value>>,
}

impl AttributeIdentifierHolder for ItemsRequest {
    fn attribute_identifiers(&self) -> indexmap::IndexSet<AttributeIdentifier> {
        self.name_spaces
            .iter()
            .flat_map(|(namespace, attributes)| {
                attributes.keys().map(|attribute| AttributeIdentifier {
                    doc_type: self.doc_type.clone(),
                    namespace: namespace.clone(),
                    attribute: attribute.clone(),
                })
            })
            .collect()
    }
}
