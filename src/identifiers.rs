//! Identification of a single attribute by document type, namespace and name.

use std::fmt::Display;

use indexmap::IndexSet;

use crate::iso::mdocs::{DataElementIdentifier, DocType, NameSpace};

/// Globally unique identifier of an attribute: its document type, namespace
/// and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeIdentifier {
    pub doc_type: DocType,
    pub namespace: NameSpace,
    pub attribute: DataElementIdentifier,
}

impl Display for AttributeIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.doc_type, self.namespace, self.attribute)
    }
}

/// Data structures that contain a set of attributes, identifiable by
/// [`AttributeIdentifier`].
pub trait AttributeIdentifierHolder {
    fn attribute_identifiers(&self) -> IndexSet<AttributeIdentifier>;

    /// The attributes of this holder that are not present in `other`.
    fn difference(&self, other: &impl AttributeIdentifierHolder) -> IndexSet<AttributeIdentifier> {
        let other_identifiers = other.attribute_identifiers();
        self.attribute_identifiers()
            .into_iter()
            .filter(|identifier| !other_identifiers.contains(identifier))
            .collect()
    }
}
