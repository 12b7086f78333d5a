//! Holder software: accepting issued mdocs, selecting attributes for
//! disclosure, and producing the device-signed structures that bind a
//! disclosure to a verifier session.

use chrono::{DateTime, Duration, Utc};
use coset::Header;
use indexmap::IndexMap;
use rustls_pki_types::TrustAnchor;

use crate::{
    errors::Result,
    iso::{
        disclosure::{
            DeviceAuth, DeviceNameSpaces, DeviceNameSpacesBytes, DeviceResponse, DeviceSigned,
            Document, IssuerSigned,
        },
        engagement::{DeviceAuthenticationKeyed, SessionTranscript},
        mdocs::{Attributes, DataElementIdentifier, DocType, NameSpace},
    },
    utils::{cose::MdocCose, keys::SigningKey, serialization::TaggedBytes},
    verifier::{ValidityRequirement, DEFAULT_CLOCK_SKEW_SECONDS},
};

/// A stored mdoc credential: the issuer-signed attributes and their MSO. The
/// device private key that the MSO commits to is managed by the caller, e.g.
/// in platform secure hardware.
#[derive(Debug, Clone)]
pub struct Mdoc {
    pub doc_type: DocType,
    pub issuer_signed: IssuerSigned,
}

impl Mdoc {
    /// Accept an issued mdoc: verify the issuer signature against
    /// `trust_anchors` and the attribute digests against the MSO. The mdoc is
    /// allowed to be not yet valid, since issuers may post-date them.
    pub fn new(
        issuer_signed: IssuerSigned,
        time: &impl crate::utils::generator::Generator<DateTime<Utc>>,
        trust_anchors: &[TrustAnchor],
    ) -> Result<Mdoc> {
        let (_, mso) = issuer_signed.verify(
            ValidityRequirement::AllowNotYetValid,
            time,
            Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
            trust_anchors,
        )?;

        Ok(Mdoc {
            doc_type: mso.doc_type,
            issuer_signed,
        })
    }

    /// Disclose the requested attributes of this mdoc for the session in
    /// `session_transcript`, signing with the holder's device key.
    pub fn disclose(
        &self,
        requested: &IndexMap<NameSpace, Vec<DataElementIdentifier>>,
        session_transcript: &SessionTranscript,
        device_key: &SigningKey,
    ) -> Result<Document> {
        Document::sign(
            self.doc_type.clone(),
            self.issuer_signed.select_attributes(requested),
            DeviceNameSpaces::new(),
            session_transcript,
            device_key,
        )
    }
}

impl IssuerSigned {
    /// An [`IssuerSigned`] containing only the requested attributes, for
    /// selective disclosure. The retained items keep the exact encodings that
    /// the MSO digests commit to; namespaces with no requested attributes are
    /// dropped entirely.
    pub fn select_attributes(
        &self,
        requested: &IndexMap<NameSpace, Vec<DataElementIdentifier>>,
    ) -> IssuerSigned {
        let name_spaces = self
            .name_spaces
            .iter()
            .filter_map(|(namespace, attrs)| {
                let requested_attrs = requested.get(namespace)?;
                let items: Vec<_> = attrs
                    .as_ref()
                    .iter()
                    .filter(|item| {
                        requested_attrs.contains(&item.as_inner().element_identifier)
                    })
                    .cloned()
                    .collect();
                (!items.is_empty()).then(|| (namespace.clone(), Attributes::from(items)))
            })
            .collect();

        IssuerSigned {
            name_spaces,
            issuer_auth: self.issuer_auth.clone(),
        }
    }
}

impl DeviceSigned {
    /// Sign a disclosure for the session in `session_transcript` with the
    /// holder's device key. The signature is computed over the detached
    /// device authentication bytes; its payload is null on the wire.
    pub fn sign(
        device_name_spaces: DeviceNameSpaces,
        doc_type: &str,
        session_transcript: &SessionTranscript,
        device_key: &SigningKey,
    ) -> Result<DeviceSigned> {
        let name_spaces: DeviceNameSpacesBytes =
            TaggedBytes::new(device_name_spaces).freeze()?;

        let device_authentication =
            DeviceAuthenticationKeyed::new(doc_type, session_transcript, name_spaces.clone());
        let signature = MdocCose::sign(
            &TaggedBytes::new(crate::utils::serialization::CborSeq(device_authentication)),
            Header::default(),
            device_key,
            false,
        )?;

        Ok(DeviceSigned {
            name_spaces,
            device_auth: DeviceAuth::DeviceSignature(signature),
        })
    }
}

impl Document {
    /// A disclosed document: the (possibly filtered) issuer-signed attributes
    /// plus the device signature binding the disclosure to the session.
    pub fn sign(
        doc_type: DocType,
        issuer_signed: IssuerSigned,
        device_name_spaces: DeviceNameSpaces,
        session_transcript: &SessionTranscript,
        device_key: &SigningKey,
    ) -> Result<Document> {
        let device_signed = DeviceSigned::sign(
            device_name_spaces,
            &doc_type,
            session_transcript,
            device_key,
        )?;

        Ok(Document {
            doc_type,
            issuer_signed,
            device_signed,
            errors: None,
        })
    }
}

impl DeviceResponse {
    /// Disclose documents from the given mdocs, each bound to the session in
    /// `session_transcript` and signed with the holder's device key.
    pub fn sign_from_mdocs(
        mdocs: Vec<Mdoc>,
        requested: &IndexMap<NameSpace, Vec<DataElementIdentifier>>,
        session_transcript: &SessionTranscript,
        device_key: &SigningKey,
    ) -> Result<DeviceResponse> {
        let documents = mdocs
            .into_iter()
            .map(|mdoc| mdoc.disclose(requested, session_transcript, device_key))
            .collect::<Result<Vec<_>>>()?;
        Ok(DeviceResponse::from_documents(documents))
    }
}
