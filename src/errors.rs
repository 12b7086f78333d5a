//! Crate-level error type, and the stable integer error codes exposed for
//! programmatic dispatch.

use serde::Serialize;

use crate::{
    iso::engagement::SessionTranscriptError,
    issuer::IssuanceError,
    utils::{
        cose::CoseError, jwk::JwkError, keys::KeysError, serialization::CborError,
        x509::CertificateError,
    },
    verifier::{RequiredField, ValidityError, VerificationError},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("COSE error: {0}")]
    Cose(#[from] CoseError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("key error: {0}")]
    Keys(#[from] KeysError),
    #[error("session transcript error: {0}")]
    SessionTranscript(#[from] SessionTranscriptError),
    #[error("issuance error: {0}")]
    Issuance(#[from] IssuanceError),
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),
}

impl Error {
    /// The stable code of this error, for programmatic dispatch. `None` for
    /// errors that can only occur while building (not verifying) structures;
    /// the verification path always produces a code.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Verification(error) => Some(error.code()),
            Error::Cose(
                CoseError::AlgorithmMissing
                | CoseError::AlgorithmMismatch
                | CoseError::UnsupportedAlgorithm
                | CoseError::UnsupportedCurve
                | CoseError::UnsupportedKeyType,
            ) => Some(ErrorCode::UnsupportedAlgorithm),
            Error::Jwk(
                JwkError::UnsupportedCurve(_)
                | JwkError::UnsupportedAlgorithm(_)
                | JwkError::UnsupportedKeyType(_),
            ) => Some(ErrorCode::UnsupportedAlgorithm),
            _ => None,
        }
    }

    /// See [`Error::code()`].
    pub fn report(&self) -> Option<ErrorReport> {
        self.code().map(|code| ErrorReport {
            code: code.code(),
            name: code.name(),
            message: self.to_string(),
        })
    }
}

/// Rendering of a coded error: stable integer code, stable name, and a
/// human-readable message.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: u16,
    pub name: &'static str,
    pub message: String,
}

/// Stable error codes. The thousands digit is the category: 1xxx
/// cryptography/trust, 2xxx document content, 3xxx session, 4xxx device,
/// 5xxx structural (51xx: a required field is missing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
#[repr(u16)]
pub enum ErrorCode {
    IssuerSignatureInvalid = 1001,
    MsoDigestMismatch = 1002,
    TrustChainUntrusted = 1003,
    CertificateExpired = 1004,
    DocExpired = 1005,
    DocNotYetValid = 1006,

    DocTypeMismatch = 2001,
    RequiredClaimMissing = 2002,
    ClaimNotRequested = 2003,
    NamespaceNotRequested = 2004,
    ProfileMismatch = 2005,

    ChallengeMissing = 3001,
    ChallengeMismatch = 3002,
    SessionExpired = 3003,
    OriginVerificationFailed = 3004,

    DeviceSignatureInvalid = 4001,
    DeviceKeyUnavailable = 4002,
    DeviceBindingFailed = 4003,

    MalformedIssuerSigned = 5001,
    MalformedDeviceSigned = 5002,
    InvalidClaimFormat = 5003,
    UnsupportedNamespace = 5004,
    UnsupportedAlgorithm = 5005,
    ValueDigestsMissingForNamespace = 5006,
    ValueDigestsMissingForDigestId = 5007,

    DocTypeMissing = 5101,
    IssuerSignedMissing = 5102,
    DeviceSignedMissing = 5103,
    IssuerAuthMissing = 5104,
    IssuerNameSpacesMissing = 5105,
    DeviceNameSpacesMissing = 5106,
    DeviceAuthMissing = 5107,
    DeviceSignatureMissing = 5108,
    DeviceMacNotSupported = 5109,
    VersionMissing = 5110,
    DigestAlgorithmMissing = 5111,
    ValueDigestsMissing = 5112,
    DeviceKeyInfoMissing = 5113,
    ValidityInfoMissing = 5114,
    SignedMissing = 5115,
    ValidFromMissing = 5116,
    ValidUntilMissing = 5117,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn name(&self) -> &'static str {
        (*self).into()
    }
}

impl VerificationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VerificationError::DeviceResponseErrors(_) => ErrorCode::MalformedDeviceSigned,
            VerificationError::UnexpectedStatus(_) => ErrorCode::MalformedDeviceSigned,
            VerificationError::FieldMissing(field) => field.code(),
            VerificationError::DeviceMacNotSupported => ErrorCode::DeviceMacNotSupported,
            VerificationError::MalformedIssuerSigned => ErrorCode::MalformedIssuerSigned,
            VerificationError::IssuerSignatureInvalid(_) => ErrorCode::IssuerSignatureInvalid,
            VerificationError::TrustChainUntrusted(_) => ErrorCode::TrustChainUntrusted,
            VerificationError::CertificateExpired => ErrorCode::CertificateExpired,
            VerificationError::DocTypeMismatch { .. } => ErrorCode::DocTypeMismatch,
            VerificationError::ValueDigestsMissingForNamespace(_) => {
                ErrorCode::ValueDigestsMissingForNamespace
            }
            VerificationError::ValueDigestsMissingForDigestId { .. } => {
                ErrorCode::ValueDigestsMissingForDigestId
            }
            VerificationError::MsoDigestMismatch { .. } => ErrorCode::MsoDigestMismatch,
            VerificationError::AttributeRandomTooShort(_) => ErrorCode::InvalidClaimFormat,
            VerificationError::DeviceKeyUnavailable(_) => ErrorCode::DeviceKeyUnavailable,
            VerificationError::DeviceSignatureInvalid(_) => ErrorCode::DeviceSignatureInvalid,
            VerificationError::Validity(ValidityError::Expired(_)) => ErrorCode::DocExpired,
            VerificationError::Validity(ValidityError::NotYetValid(_)) => ErrorCode::DocNotYetValid,
            VerificationError::Validity(ValidityError::ParsingFailed(_)) => {
                ErrorCode::InvalidClaimFormat
            }
            VerificationError::RequiredClaimMissing(_) => ErrorCode::RequiredClaimMissing,
            VerificationError::UnexpectedCaCommonNameCount(_)
            | VerificationError::UnexpectedIssuerCommonNameCount(_) => {
                ErrorCode::TrustChainUntrusted
            }
        }
    }
}

impl RequiredField {
    pub fn code(&self) -> ErrorCode {
        match self {
            RequiredField::Version => ErrorCode::VersionMissing,
            RequiredField::DocType => ErrorCode::DocTypeMissing,
            RequiredField::IssuerSigned => ErrorCode::IssuerSignedMissing,
            RequiredField::IssuerNameSpaces => ErrorCode::IssuerNameSpacesMissing,
            RequiredField::IssuerAuth => ErrorCode::IssuerAuthMissing,
            RequiredField::DeviceSigned => ErrorCode::DeviceSignedMissing,
            RequiredField::DeviceNameSpaces => ErrorCode::DeviceNameSpacesMissing,
            RequiredField::DeviceAuth => ErrorCode::DeviceAuthMissing,
            RequiredField::DeviceSignature => ErrorCode::DeviceSignatureMissing,
            RequiredField::DigestAlgorithm => ErrorCode::DigestAlgorithmMissing,
            RequiredField::ValueDigests => ErrorCode::ValueDigestsMissing,
            RequiredField::DeviceKeyInfo => ErrorCode::DeviceKeyInfoMissing,
            RequiredField::ValidityInfo => ErrorCode::ValidityInfoMissing,
            RequiredField::Signed => ErrorCode::SignedMissing,
            RequiredField::ValidFrom => ErrorCode::ValidFromMissing,
            RequiredField::ValidUntil => ErrorCode::ValidUntilMissing,
        }
    }
}
