pub mod cose;
pub mod crypto;
pub mod generator;
pub mod jwk;
pub mod keys;
pub mod serialization;
pub mod x509;
