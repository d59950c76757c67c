//! Signature blocks and the certificates they carry.

mod block;
mod certificate;
mod hash;
mod pkcs7;

pub use block::verify_block;
pub use certificate::{build_chain, Certificate, CertificateChain, CertificateEntries};
pub use hash::DigestAlgorithm;
pub use pkcs7::{SignedData, SignerIdentifier, SignerInfo};

pub(crate) use hash::MultiHash;
