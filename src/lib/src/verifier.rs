//! The verification state machine.
//!
//! ```text
//! Start -> IntegrityChecking -> NotSigned | Corrupted | UnknownError | Cancelled
//!          IntegrityChecking -> IntegrityVerified -> TrustChecking
//!                               TrustChecking -> SourceVerified | IntegrityVerified | UnknownError
//! ```
//!
//! A run never returns an error: every failure is folded into a
//! [`ResultCode`] with an optional [`FailureCause`].

use std::error::Error as StdError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::archive::{self, IntegrityStatus};
use crate::audit;
use crate::error::*;
use crate::keystore::TrustStoreCache;
use crate::progress::{CancellationToken, NullProgress, ProgressSink};
use crate::signature::CertificateEntries;
use crate::trust;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultCode {
    NotSigned,
    Corrupted,
    IntegrityVerified,
    SourceVerified,
    UnknownError,
    Cancelled,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::NotSigned => "NotSigned",
            ResultCode::Corrupted => "Corrupted",
            ResultCode::IntegrityVerified => "IntegrityVerified",
            ResultCode::SourceVerified => "SourceVerified",
            ResultCode::UnknownError => "UnknownError",
            ResultCode::Cancelled => "Cancelled",
        }
    }

    /// Results a caller should treat as a failed verification.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResultCode::Corrupted | ResultCode::UnknownError | ResultCode::Cancelled
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic detail attached to a result, nested the way the underlying
/// errors were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCause {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<FailureCause>>,
}

impl FailureCause {
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let kind = if let Some(e) = err.downcast_ref::<JarError>() {
            e.kind()
        } else if let Some(e) = err.downcast_ref::<TrustStoreError>() {
            e.kind()
        } else if err.is::<std::io::Error>() {
            "io"
        } else {
            "error"
        };
        FailureCause {
            kind: kind.to_string(),
            message: err.to_string(),
            source: err.source().map(|s| Box::new(FailureCause::from_error(s))),
        }
    }

    /// Innermost cause.
    pub fn root(&self) -> &FailureCause {
        let mut cause = self;
        while let Some(source) = &cause.source {
            cause = source;
        }
        cause
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub code: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}

impl VerificationResult {
    fn new(code: ResultCode) -> Self {
        VerificationResult { code, cause: None }
    }

    fn failed(code: ResultCode, err: &JarError) -> Self {
        VerificationResult {
            code,
            cause: Some(FailureCause::from_error(err)),
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})", self.code, cause),
            None => write!(f, "{}", self.code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierState {
    Start,
    IntegrityChecking,
    IntegrityVerified,
    TrustChecking,
    NotSigned,
    Corrupted,
    SourceVerified,
    UnknownError,
    Cancelled,
}

impl VerifierState {
    fn can_transition_to(self, next: VerifierState) -> bool {
        use VerifierState::*;
        matches!(
            (self, next),
            (Start, IntegrityChecking)
                | (IntegrityChecking, NotSigned)
                | (IntegrityChecking, Corrupted)
                | (IntegrityChecking, UnknownError)
                | (IntegrityChecking, Cancelled)
                | (IntegrityChecking, IntegrityVerified)
                | (IntegrityVerified, TrustChecking)
                | (TrustChecking, SourceVerified)
                | (TrustChecking, IntegrityVerified)
                | (TrustChecking, UnknownError)
        )
    }

    fn terminal(code: ResultCode) -> Self {
        match code {
            ResultCode::NotSigned => VerifierState::NotSigned,
            ResultCode::Corrupted => VerifierState::Corrupted,
            ResultCode::IntegrityVerified => VerifierState::IntegrityVerified,
            ResultCode::SourceVerified => VerifierState::SourceVerified,
            ResultCode::UnknownError => VerifierState::UnknownError,
            ResultCode::Cancelled => VerifierState::Cancelled,
        }
    }
}

/// Verifies archives against a shared trust store cache.
///
/// The verifier keeps the certificate chains of the last run so a later
/// step can offer them for installation into a trust store.
pub struct JarVerifier {
    cache: Arc<TrustStoreCache>,
    refresh_trust_stores: bool,
    progress: Box<dyn ProgressSink + Send>,
    cancel: CancellationToken,
    state: VerifierState,
    entries: CertificateEntries,
}

impl JarVerifier {
    pub fn new(cache: Arc<TrustStoreCache>) -> Self {
        JarVerifier {
            cache,
            refresh_trust_stores: false,
            progress: Box::new(NullProgress),
            cancel: CancellationToken::new(),
            state: VerifierState::Start,
            entries: CertificateEntries::new(),
        }
    }

    pub fn set_progress_sink(&mut self, progress: impl ProgressSink + Send + 'static) {
        self.progress = Box::new(progress);
    }

    pub fn set_cancellation_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// Reload every trust store before the trust phase of each run.
    pub fn set_refresh_trust_stores(&mut self, refresh: bool) {
        self.refresh_trust_stores = refresh;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn trust_store_cache(&self) -> &Arc<TrustStoreCache> {
        &self.cache
    }

    /// Distinct chains found by the last run. Empty after a run that did not
    /// complete its integrity phase.
    pub fn certificate_entries(&self) -> &CertificateEntries {
        &self.entries
    }

    pub fn state(&self) -> VerifierState {
        self.state
    }

    /// Verify using the configured progress sink and cancellation token.
    pub fn verify(&mut self, path: impl AsRef<Path>) -> VerificationResult {
        let mut progress: Box<dyn ProgressSink + Send> =
            std::mem::replace(&mut self.progress, Box::new(NullProgress));
        let cancel = self.cancel.clone();
        let result = self.run(path.as_ref(), progress.as_mut(), &cancel);
        self.progress = progress;
        result
    }

    /// Verify with a caller-supplied progress sink and cancellation token.
    pub fn run(
        &mut self,
        path: &Path,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        self.entries.clear();
        self.state = VerifierState::Start;

        let archive_name = path.display().to_string();
        let correlation_id = audit::new_correlation_id();
        audit::log_verification_attempt(&correlation_id, &archive_name);

        let (result, trusted_by) = match self.check(path, progress, cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("{}: internal verifier error: {}", archive_name, e);
                (VerificationResult::failed(ResultCode::UnknownError, &e), None)
            }
        };
        self.state = VerifierState::terminal(result.code);

        match &result.cause {
            Some(cause) if result.code.is_failure() => audit::log_verification_failure(
                &correlation_id,
                &archive_name,
                result.code.as_str(),
                &cause.kind,
                &cause.to_string(),
            ),
            _ if result.code == ResultCode::Cancelled => audit::log_verification_failure(
                &correlation_id,
                &archive_name,
                result.code.as_str(),
                "cancelled",
                "verification cancelled",
            ),
            _ => audit::log_verification_success(
                &correlation_id,
                &archive_name,
                result.code.as_str(),
                self.entries.len(),
                trusted_by.as_deref(),
            ),
        }
        log::info!("{}: {}", archive_name, result);
        result
    }

    fn transition(&mut self, next: VerifierState) -> Result<(), JarError> {
        if !self.state.can_transition_to(next) {
            return Err(JarError::InternalError(format!(
                "invalid verifier transition {:?} -> {:?}",
                self.state, next
            )));
        }
        log::debug!("Verifier state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn finish(
        &mut self,
        result: VerificationResult,
        trusted_by: Option<String>,
    ) -> Result<(VerificationResult, Option<String>), JarError> {
        self.transition(VerifierState::terminal(result.code))?;
        Ok((result, trusted_by))
    }

    fn check(
        &mut self,
        path: &Path,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(VerificationResult, Option<String>), JarError> {
        self.transition(VerifierState::IntegrityChecking)?;
        let scan = match archive::read_and_collect(path, progress, cancel) {
            Ok(scan) => scan,
            Err(e @ JarError::IntegrityViolation { .. }) => {
                log::warn!("{}: {}", path.display(), e);
                return self.finish(VerificationResult::failed(ResultCode::Corrupted, &e), None);
            }
            Err(JarError::Cancelled) => {
                return self.finish(VerificationResult::new(ResultCode::Cancelled), None);
            }
            Err(e) => {
                return self.finish(VerificationResult::failed(ResultCode::UnknownError, &e), None);
            }
        };

        if scan.integrity() == IntegrityStatus::NotSigned {
            return self.finish(VerificationResult::new(ResultCode::NotSigned), None);
        }
        self.entries = scan.certificate_entries();
        self.transition(VerifierState::IntegrityVerified)?;

        self.transition(VerifierState::TrustChecking)?;
        let stores = match self.cache.trust_stores(self.refresh_trust_stores) {
            Ok(stores) => stores,
            Err(e) => {
                log::warn!("{}: trust stores unavailable: {}", path.display(), e);
                return self.finish(VerificationResult::failed(ResultCode::UnknownError, &e), None);
            }
        };
        match trust::find_trusted(&self.entries, &stores) {
            Some(found) => {
                log::debug!(
                    "{}: certificate '{}' trusted by {}",
                    path.display(),
                    found.certificate.subject(),
                    found.store.name()
                );
                let store = found.store.name().to_string();
                self.finish(VerificationResult::new(ResultCode::SourceVerified), Some(store))
            }
            None => self.finish(VerificationResult::new(ResultCode::IntegrityVerified), None),
        }
    }

    /// Offer the chains of the last run for installation into a trust store.
    ///
    /// Installing is left to the embedding application; this only reports
    /// what would be installed.
    pub fn install_certificates(&self) -> Result<(), JarError> {
        for chain in self.entries.iter() {
            if let Some(leaf) = chain.leaf() {
                log::info!(
                    "Certificate available for installation: {} (issuer {}, sha256 {})",
                    leaf.subject(),
                    leaf.issuer(),
                    leaf.fingerprint()
                );
            }
        }
        Ok(())
    }
}

impl fmt::Debug for JarVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JarVerifier")
            .field("state", &self.state)
            .field("refresh_trust_stores", &self.refresh_trust_stores)
            .field("chains", &self.entries.len())
            .finish()
    }
}
