use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use x509_parser::extensions::ParsedExtension;

use super::hash::DigestAlgorithm;
use crate::error::*;

/// An X.509 certificate.
///
/// Identity is the DER encoding: two certificates are the same certificate
/// if and only if their encodings are byte-identical.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    serial: Vec<u8>,
    issuer: Vec<u8>,
    subject: Vec<u8>,
    spki: Vec<u8>,
    subject_key_id: Option<Vec<u8>>,
    subject_name: String,
    issuer_name: String,
}

impl Certificate {
    /// Parse a DER-encoded certificate. Trailing data after the
    /// certificate is ignored.
    pub fn from_der(bytes: &[u8]) -> Result<Self, JarError> {
        let (rest, parsed) = x509_parser::parse_x509_certificate(bytes)
            .map_err(|e| JarError::X509Error(format!("{:?}", e)))?;
        let subject_key_id = parsed.extensions().iter().find_map(|ext| {
            match ext.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
                _ => None,
            }
        });

        Ok(Certificate {
            der: bytes[..bytes.len() - rest.len()].to_vec(),
            serial: parsed.tbs_certificate.raw_serial().to_vec(),
            issuer: parsed.issuer().as_raw().to_vec(),
            subject: parsed.subject().as_raw().to_vec(),
            spki: parsed.public_key().raw.to_vec(),
            subject_key_id,
            subject_name: parsed.subject().to_string(),
            issuer_name: parsed.issuer().to_string(),
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Content octets of the serial number `INTEGER`.
    pub fn serial_raw(&self) -> &[u8] {
        &self.serial
    }

    /// Full encoding of the issuer `Name`.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer
    }

    /// Full encoding of the subject `Name`.
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject
    }

    /// Full encoding of the `SubjectPublicKeyInfo`.
    pub fn spki_raw(&self) -> &[u8] {
        &self.spki
    }

    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.subject_key_id.as_deref()
    }

    pub fn subject(&self) -> &str {
        &self.subject_name
    }

    pub fn issuer(&self) -> &str {
        &self.issuer_name
    }

    /// Serial number as colon-separated hex, the way keytool prints it.
    pub fn serial_hex(&self) -> String {
        self.serial_raw()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// SHA-256 fingerprint of the encoding, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(DigestAlgorithm::Sha256.digest(&self.der))
    }

    pub fn is_self_issued(&self) -> bool {
        self.issuer_raw() == self.subject_raw()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

impl PartialOrd for Certificate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Certificate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.der.cmp(&other.der)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject_name)
            .field("issuer", &self.issuer_name)
            .field("serial", &self.serial_hex())
            .finish()
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subject_name)
    }
}

/// Ordered certificates vouching for one archive entry.
///
/// When several signers cover an entry their chains are concatenated, each
/// starting with the signer's own certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    pub fn new(certificates: Vec<Certificate>) -> Self {
        CertificateChain(certificates)
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First certificate of the chain.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.0.first()
    }

    pub fn append(&mut self, other: &CertificateChain) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Distinct, non-empty certificate chains found in one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateEntries {
    chains: BTreeSet<CertificateChain>,
}

impl CertificateEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain. Empty chains are ignored; returns whether the set grew.
    pub fn insert(&mut self, chain: CertificateChain) -> bool {
        if chain.is_empty() {
            return false;
        }
        self.chains.insert(chain)
    }

    pub fn contains(&self, chain: &CertificateChain) -> bool {
        self.chains.contains(chain)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CertificateChain> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }
}

impl FromIterator<CertificateChain> for CertificateEntries {
    fn from_iter<I: IntoIterator<Item = CertificateChain>>(iter: I) -> Self {
        let mut entries = CertificateEntries::new();
        for chain in iter {
            entries.insert(chain);
        }
        entries
    }
}

/// Order the certificates of a signature block into the signer's chain:
/// the signer first, then each issuer found in `pool`, stopping at a
/// self-issued certificate or when no issuer is present.
pub fn build_chain(signer: &Certificate, pool: &[Certificate]) -> CertificateChain {
    let mut chain = vec![signer.clone()];
    let mut current = signer;
    while !current.is_self_issued() && chain.len() <= pool.len() {
        let next = pool
            .iter()
            .find(|c| c.subject_raw() == current.issuer_raw() && !chain.contains(c));
        match next {
            Some(issuer) => {
                chain.push(issuer.clone());
                current = issuer;
            }
            None => break,
        }
    }
    CertificateChain(chain)
}
