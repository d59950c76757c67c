//! Verification of signed Java archives.
//!
//! [`JarVerifier`] checks that every signed entry of a jar still matches its
//! manifest digest, that the signature files are validly signed, and whether
//! any signer certificate is present in the configured trust stores. The
//! outcome is a single [`ResultCode`]:
//!
//! - `NotSigned` - no entry is covered by a signature
//! - `Corrupted` - a digest or signature does not match
//! - `IntegrityVerified` - intact, but no signer is trusted
//! - `SourceVerified` - intact and a signer is in a trust store
//! - `UnknownError` / `Cancelled`
//!
//! [`pipeline::JarProcessor`] applies the same check to jars nested inside
//! jars.

#![forbid(unsafe_code)]

mod error;

pub mod archive;
pub mod audit;
pub mod config;
pub mod keystore;
pub mod pipeline;
pub mod progress;
pub mod signature;
pub mod trust;
pub mod verifier;

pub use error::*;

pub use config::VerifierConfig;
pub use keystore::{KeystoreDescriptor, KeystoreType, TrustStore, TrustStoreCache};
pub use progress::{CancellationToken, ProgressSink};
pub use signature::{Certificate, CertificateChain, CertificateEntries, DigestAlgorithm};
pub use verifier::{FailureCause, JarVerifier, ResultCode, VerificationResult, VerifierState};

pub mod reexports {
    pub use {log, thiserror};
}
