//! CBOR (de)serialization helpers and the wrapper types that give our data
//! structures their ISO 18013-5 wire shapes: embedded-CBOR byte strings
//! (Tag 24), structs encoded as CBOR arrays, and structs encoded as maps with
//! integer keys.

use std::{borrow::Cow, fmt::Debug, io::Cursor, marker::PhantomData};

use ciborium::{tag, value::Value};
use serde::{
    de::{self, DeserializeOwned},
    ser, Deserialize, Deserializer, Serialize, Serializer,
};
use serde_aux::serde_introspection::serde_introspect;
use serde_bytes::ByteBuf;

/// CBOR tag for an "embedded CBOR data item": a byte string containing the
/// encoding of another data item.
pub const CBOR_TAG_ENC_CBOR: u64 = 24;

#[derive(thiserror::Error, Debug)]
pub enum CborError {
    #[error("CBOR serialization failed: {0}")]
    Serialization(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("CBOR deserialization failed: {0}")]
    Deserialization(#[from] ciborium::de::Error<std::io::Error>),
    #[error("CBOR value conversion failed: {0}")]
    Value(#[from] ciborium::value::Error),
    #[error("unexpected CBOR tag: expected {expected}, found {found}")]
    UnexpectedTag { expected: u64, found: u64 },
    #[error("unexpected CBOR type: expected {expected}")]
    UnexpectedType { expected: &'static str },
    #[error("{0} trailing bytes after CBOR value")]
    TrailingBytes(usize),
}

pub fn cbor_serialize<T: Serialize>(o: &T) -> Result<Vec<u8>, CborError> {
    let mut bts: Vec<u8> = Vec::new();
    ciborium::ser::into_writer(o, &mut bts)?;
    Ok(bts)
}

/// Deserialize a single CBOR value, requiring that it spans the entire input.
pub fn cbor_deserialize<T: DeserializeOwned>(bts: &[u8]) -> Result<T, CborError> {
    let mut cursor = Cursor::new(bts);
    let value = ciborium::de::from_reader(&mut cursor)?;
    let remaining = bts.len() - cursor.position() as usize;
    if remaining > 0 {
        return Err(CborError::TrailingBytes(remaining));
    }
    Ok(value)
}

/// Wrapper around `T` that (de)serializes to/from a Tag 24 byte string
/// containing the CBOR encoding of `T`.
///
/// The byte string received during deserialization is retained verbatim, so
/// that later serializations and digest computations see the transported
/// encoding bit for bit, even if the producer encoded `T` differently than we
/// would. Values constructed locally can pin their encoding once with
/// [`TaggedBytes::freeze()`].
#[derive(Debug, Clone)]
pub struct TaggedBytes<T> {
    value: T,
    original: Option<Vec<u8>>,
}

impl<T> TaggedBytes<T> {
    pub fn new(value: T) -> Self {
        TaggedBytes {
            value,
            original: None,
        }
    }

    pub fn as_inner(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// The inner byte string as received, if this value came from a decoder
    /// or has been frozen.
    pub fn inner_bytes(&self) -> Option<&[u8]> {
        self.original.as_deref()
    }
}

impl<T: Serialize> TaggedBytes<T> {
    /// Encode the inner value once and pin the resulting bytes, so that every
    /// later serialization of this wrapper reproduces the same encoding.
    pub fn freeze(mut self) -> Result<Self, CborError> {
        if self.original.is_none() {
            self.original = Some(cbor_serialize(&self.value)?);
        }
        Ok(self)
    }
}

impl<T> From<T> for TaggedBytes<T> {
    fn from(value: T) -> Self {
        TaggedBytes::new(value)
    }
}

impl<T: Default> Default for TaggedBytes<T> {
    fn default() -> Self {
        TaggedBytes::new(T::default())
    }
}

impl<T: PartialEq> PartialEq for TaggedBytes<T> {
    // Equality is on the inner value; the cached encoding is transport state.
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Serialize> Serialize for TaggedBytes<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let buf: Cow<[u8]> = match &self.original {
            Some(bts) => Cow::Borrowed(bts.as_slice()),
            None => Cow::Owned(cbor_serialize(&self.value).map_err(ser::Error::custom)?),
        };
        tag::Required::<_, CBOR_TAG_ENC_CBOR>(serde_bytes::Bytes::new(&buf)).serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for TaggedBytes<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag::Required::<ByteBuf, CBOR_TAG_ENC_CBOR>(buf) =
            tag::Required::deserialize(deserializer)?;
        let value = cbor_deserialize(&buf).map_err(de::Error::custom)?;
        Ok(TaggedBytes {
            value,
            original: Some(buf.into_vec()),
        })
    }
}

/// Wrapper around `T` that serializes the fields of `T` as a CBOR array,
/// without the field names, in declaration order. ISO 18013-5 encodes several
/// structures this way (e.g. `DeviceAuthentication`, `SessionTranscript`).
#[derive(Debug, Clone, PartialEq)]
pub struct CborSeq<T>(pub T);

impl<T> From<T> for CborSeq<T> {
    fn from(value: T) -> Self {
        CborSeq(value)
    }
}

impl<T: Serialize> Serialize for CborSeq<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = Value::serialized(&self.0).map_err(ser::Error::custom)?;
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(_, value)| value)
                .collect::<Vec<_>>()
                .serialize(serializer),
            _ => Err(ser::Error::custom("CborSeq contents are not a struct")),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for CborSeq<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;
        let field_names = serde_introspect::<T>();
        if values.len() > field_names.len() {
            return Err(de::Error::custom("too many array elements for CborSeq"));
        }
        Value::Map(
            field_names
                .iter()
                .zip(values)
                .map(|(name, value)| (Value::Text((*name).to_string()), value))
                .collect(),
        )
        .deserialized()
        .map(CborSeq)
        .map_err(de::Error::custom)
    }
}

/// Wrapper around `T` that serializes the fields of `T` as a CBOR map keyed by
/// the nonnegative integer index of each field, instead of its name. Fields
/// skipped by `skip_serializing_none` keep the indices of the remaining fields
/// stable. Used by the ISO device/reader engagement structures.
#[derive(Debug, Clone, PartialEq)]
pub struct CborIntMap<T>(pub T);

impl<T> From<T> for CborIntMap<T> {
    fn from(value: T) -> Self {
        CborIntMap(value)
    }
}

impl<T: Serialize + DeserializeOwned> Serialize for CborIntMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let field_names = serde_introspect::<T>();
        let value = Value::serialized(&self.0).map_err(ser::Error::custom)?;
        let Value::Map(entries) = value else {
            return Err(ser::Error::custom("CborIntMap contents are not a struct"));
        };
        let indexed = entries
            .into_iter()
            .map(|(key, value)| {
                let name = match &key {
                    Value::Text(name) => name.as_str(),
                    _ => return Err(ser::Error::custom("non-text field key")),
                };
                let index = field_names
                    .iter()
                    .position(|field| *field == name)
                    .ok_or_else(|| ser::Error::custom("unknown field in CborIntMap"))?;
                Ok((Value::Integer((index as u64).into()), value))
            })
            .collect::<Result<Vec<_>, S::Error>>()?;
        Value::Map(indexed).serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for CborIntMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let field_names = serde_introspect::<T>();
        let Value::Map(entries) = Value::deserialize(deserializer)? else {
            return Err(de::Error::custom("CborIntMap is not a map"));
        };
        let named = entries
            .into_iter()
            .map(|(key, value)| {
                let index: u64 = key
                    .as_integer()
                    .and_then(|i| i.try_into().ok())
                    .ok_or_else(|| de::Error::custom("non-integer key in CborIntMap"))?;
                let name = field_names
                    .get(index as usize)
                    .ok_or_else(|| de::Error::custom("field index out of range"))?;
                Ok((Value::Text((*name).to_string()), value))
            })
            .collect::<Result<Vec<_>, D::Error>>()?;
        Value::Map(named)
            .deserialized()
            .map(CborIntMap)
            .map_err(de::Error::custom)
    }
}

/// Contract for marker types that pin a field to a single allowed value,
/// e.g. the `"DeviceAuthentication"` context string.
pub trait RequiredValueTrait {
    type Type: Serialize + DeserializeOwned + PartialEq + Debug;
    const REQUIRED_VALUE: Self::Type;
}

/// Zero-sized field that serializes to `T::REQUIRED_VALUE` and refuses to
/// deserialize from anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequiredValue<T>(PhantomData<T>);

impl<T: RequiredValueTrait> Serialize for RequiredValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        T::REQUIRED_VALUE.serialize(serializer)
    }
}

impl<'de, T: RequiredValueTrait> Deserialize<'de> for RequiredValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let found = T::Type::deserialize(deserializer)?;
        if found != T::REQUIRED_VALUE {
            return Err(de::Error::custom(format!(
                "unexpected value {:?}, expected {:?}",
                found,
                T::REQUIRED_VALUE
            )));
        }
        Ok(RequiredValue(PhantomData))
    }
}

/// Context string of the `DeviceAuthentication` array.
#[derive(Debug, Clone, Default)]
pub struct DeviceAuthenticationString;
impl RequiredValueTrait for DeviceAuthenticationString {
    type Type = Cow<'static, str>;
    const REQUIRED_VALUE: Self::Type = Cow::Borrowed("DeviceAuthentication");
}

/// Identifier of the OpenID4VP Digital Credentials API handover.
#[derive(Debug, Clone, Default)]
pub struct OpenId4VpDcApiHandoverString;
impl RequiredValueTrait for OpenId4VpDcApiHandoverString {
    type Type = Cow<'static, str>;
    const REQUIRED_VALUE: Self::Type = Cow::Borrowed("OpenID4VPDCAPIHandover");
}
