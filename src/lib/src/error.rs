/// The jarverify error type.
#[derive(Debug, thiserror::Error)]
pub enum JarError {
    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("I/O error")]
    IOError(#[from] std::io::Error),

    #[error("Invalid archive: {0}")]
    ArchiveError(String),

    #[error("Manifest error: {0}")]
    ManifestError(String),

    #[error("DER parse error: {0}")]
    DerError(#[from] spki::der::Error),

    #[error("Signature block error: {0}")]
    SignatureBlockError(String),

    #[error("X509 error: {0}")]
    X509Error(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Integrity check failed for '{entry}': {reason}")]
    IntegrityViolation { entry: String, reason: String },

    #[error("Verification cancelled")]
    Cancelled,

    #[error("Trust store error")]
    TrustStoreError(#[from] TrustStoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

impl JarError {
    pub(crate) fn integrity(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        JarError::IntegrityViolation {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    /// Short, stable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            JarError::InternalError(_) => "internal",
            JarError::IOError(_) => "io",
            JarError::ArchiveError(_) => "archive",
            JarError::ManifestError(_) => "manifest",
            JarError::DerError(_) => "der",
            JarError::SignatureBlockError(_) => "signature_block",
            JarError::X509Error(_) => "x509",
            JarError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            JarError::IntegrityViolation { .. } => "integrity",
            JarError::Cancelled => "cancelled",
            JarError::TrustStoreError(e) => e.kind(),
            JarError::ConfigError(_) => "config",
            JarError::UsageError(_) => "usage",
        }
    }
}

/// Failure while loading a configured trust store.
///
/// One bad store aborts the whole load unless the loader was configured to
/// skip it.
#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error("Unable to find provider for the keystore type '{store_type}' ({location})")]
    UnsupportedType { store_type: String, location: String },

    #[error("Unable to load a certificate in the keystore {location}: {detail}")]
    MalformedCertificate { location: String, detail: String },

    #[error("Unable to access keystore {location}")]
    Unreadable {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to find algorithm '{algorithm}' required by keystore {location}")]
    UnsupportedAlgorithm { algorithm: String, location: String },
}

impl TrustStoreError {
    pub(crate) fn malformed(location: &str, detail: impl Into<String>) -> Self {
        TrustStoreError::MalformedCertificate {
            location: location.to_string(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrustStoreError::UnsupportedType { .. } => "truststore_unsupported_type",
            TrustStoreError::MalformedCertificate { .. } => "truststore_malformed_certificate",
            TrustStoreError::Unreadable { .. } => "truststore_unreadable",
            TrustStoreError::UnsupportedAlgorithm { .. } => "truststore_unsupported_algorithm",
        }
    }

    /// Location of the store that failed to load.
    pub fn location(&self) -> &str {
        match self {
            TrustStoreError::UnsupportedType { location, .. }
            | TrustStoreError::MalformedCertificate { location, .. }
            | TrustStoreError::Unreadable { location, .. }
            | TrustStoreError::UnsupportedAlgorithm { location, .. } => location,
        }
    }
}

impl From<zip::result::ZipError> for JarError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => JarError::IOError(e),
            other => JarError::ArchiveError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = JarError::Cancelled;
        assert_eq!(err.to_string(), "Verification cancelled");

        let err = JarError::integrity("a/B.class", "SHA-256 digest mismatch");
        assert_eq!(
            err.to_string(),
            "Integrity check failed for 'a/B.class': SHA-256 digest mismatch"
        );

        let err = JarError::UsageError("missing input file");
        assert_eq!(err.to_string(), "Usage error: missing input file");
    }

    #[test]
    fn test_trust_store_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: JarError = TrustStoreError::Unreadable {
            location: "/etc/ks.jks".to_string(),
            source: io,
        }
        .into();

        assert_eq!(err.kind(), "truststore_unreadable");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "Unable to access keystore /etc/ks.jks");
        assert_eq!(source.source().unwrap().to_string(), "no such file");
    }

    #[test]
    fn test_zip_io_error_maps_to_io() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid checksum");
        let err: JarError = zip::result::ZipError::Io(io).into();
        assert!(matches!(err, JarError::IOError(_)));
    }
}
