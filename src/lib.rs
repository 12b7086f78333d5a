//! Issuance and verification of ISO/IEC 18013-5 mobile documents (mdocs),
//! the credential format behind mobile driver's licenses (mDL).
//!
//! An issuer turns a set of attributes into an [`IssuerSigned`]: per-attribute
//! salted digests committed to in a Mobile Security Object, signed with a
//! `COSE_Sign1` carrying the issuer's X.509 chain ([`IssuerSigned::sign()`]).
//! A holder discloses a subset of those attributes in a [`Document`], binding
//! the disclosure to a verifier session with a device signature over the
//! [`SessionTranscript`] ([`holder`]). A verifier checks the whole chain:
//! structure, issuer signature and trust chain, digests, device signature and
//! validity window ([`DeviceResponse::verify()`]).
//!
//! Everything is plain CBOR/COSE data in, data out: no transport, no
//! persistence, no ambient state. Keys are caller-owned and accepted as JWKs
//! or raw signing keys at the edges.

pub mod errors;
pub mod holder;
pub mod identifiers;
pub mod iso;
pub mod issuer;
pub mod utils;
pub mod verifier;

pub use errors::{Error, ErrorCode, ErrorReport, Result};
pub use iso::*;
