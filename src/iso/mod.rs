//! Data structures defined by ISO 18013-5, divided into the issuer-signed
//! structures ([`mdocs`]), the disclosure structures ([`disclosure`]), the
//! session binding structures ([`engagement`]), and device retrieval requests
//! ([`device_retrieval`]).

pub mod device_retrieval;
pub mod disclosure;
pub mod engagement;
pub mod mdocs;

pub use device_retrieval::*;
pub use disclosure::*;
pub use engagement::*;
pub use mdocs::*;
