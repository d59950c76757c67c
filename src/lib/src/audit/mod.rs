//! Audit logging for archive verification.
//!
//! Verification emits structured `tracing` events under the
//! `jarverify::audit` target. Nothing is recorded unless the embedding
//! program installs a subscriber, either its own or the one built by
//! [`init`].
//!
//! # Event Types
//!
//! - `verification.attempt` - Verification started
//! - `verification.success` - Verification finished with a non-error result
//! - `verification.failure` - Verification finished with `Corrupted`,
//!   `UnknownError` or `Cancelled`
//!
//! # JSON Output Example
//!
//! ```json
//! {
//!   "timestamp": "2026-01-04T20:00:00Z",
//!   "level": "INFO",
//!   "target": "jarverify::audit",
//!   "event_type": "verification.success",
//!   "archive": "plugins/org.example.core.jar",
//!   "result": "SourceVerified",
//!   "chain_count": 1
//! }
//! ```

use std::sync::OnceLock;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    prelude::*,
    EnvFilter,
};

use crate::error::*;

pub const AUDIT_TARGET: &str = "jarverify::audit";

static AUDIT_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub destination: LogDestination,
    /// Use JSON lines instead of plain text
    pub json_format: bool,
    /// Log level filter (default: "jarverify::audit=info")
    pub filter: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: LogDestination::Stderr,
            json_format: true,
            filter: format!("{}=info", AUDIT_TARGET),
        }
    }
}

/// Audit log destination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    #[default]
    Stderr,
    /// Append to a file
    File(String),
}

/// Install the audit subscriber.
///
/// Only the first call has an effect. Fails if the log file cannot be
/// opened; an already installed global subscriber is left in place.
pub fn init(config: AuditConfig) -> Result<(), JarError> {
    if AUDIT_INITIALIZED.get().is_some() {
        return Ok(());
    }
    if !config.enabled {
        let _ = AUDIT_INITIALIZED.set(true);
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = match &config.destination {
        LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    };

    let installed = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(writer),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(writer))
            .try_init()
    };
    if let Err(e) = installed {
        log::warn!("Audit subscriber not installed: {}", e);
    }

    let _ = AUDIT_INITIALIZED.set(true);
    Ok(())
}

/// Identifier tying together the events of one verification run.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn log_verification_attempt(correlation_id: &str, archive: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "verification.attempt",
        correlation_id = correlation_id,
        archive = archive,
        "Verification started"
    );
}

pub fn log_verification_success(
    correlation_id: &str,
    archive: &str,
    result: &str,
    chain_count: usize,
    trusted_by: Option<&str>,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "verification.success",
        correlation_id = correlation_id,
        archive = archive,
        result = result,
        chain_count = chain_count,
        trusted_by = trusted_by.unwrap_or("n/a"),
        "Verification completed"
    );
}

pub fn log_verification_failure(
    correlation_id: &str,
    archive: &str,
    result: &str,
    error_type: &str,
    error_message: &str,
) {
    let safe_message = sanitize_error_message(error_message);
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "verification.failure",
        correlation_id = correlation_id,
        archive = archive,
        result = result,
        error_type = error_type,
        error_message = %safe_message,
        "Verification failed"
    );
}

/// Keep audit records bounded: long base64 runs (digests, encoded keys)
/// are elided and the message is truncated.
fn sanitize_error_message(message: &str) -> String {
    let sanitized = message
        .split_whitespace()
        .map(|word| {
            if word.len() > 40
                && word
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
            {
                "[ELIDED]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.len() > 500 {
        let mut end = 497;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &sanitized[..end])
    } else {
        sanitized
    }
}
