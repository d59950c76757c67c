use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::io::{self, Write};

/// Message digest algorithms accepted in manifests, signature files and
/// signature blocks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

// DER-encoded object identifiers (content octets only).
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
const OID_SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 4] = [
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// Parse the algorithm prefix used in manifest attribute names
    /// (`SHA-256` in `SHA-256-Digest`). Matching is case-insensitive and
    /// accepts both `SHA1` and `SHA-1` spellings.
    pub fn from_manifest_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "SHA1" => Some(DigestAlgorithm::Sha1),
            "SHA256" => Some(DigestAlgorithm::Sha256),
            "SHA384" => Some(DigestAlgorithm::Sha384),
            "SHA512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Map a digest algorithm identifier found in a signature block.
    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        match oid {
            OID_SHA1 => Some(DigestAlgorithm::Sha1),
            OID_SHA256 => Some(DigestAlgorithm::Sha256),
            OID_SHA384 => Some(DigestAlgorithm::Sha384),
            OID_SHA512 => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn oid(&self) -> &'static [u8] {
        match self {
            DigestAlgorithm::Sha1 => OID_SHA1,
            DigestAlgorithm::Sha256 => OID_SHA256,
            DigestAlgorithm::Sha384 => OID_SHA384,
            DigestAlgorithm::Sha512 => OID_SHA512,
        }
    }

    /// Name as written in manifest attributes.
    pub fn manifest_name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hash = Hash::new(*self);
        hash.update(data);
        hash.finalize()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_name())
    }
}

/// Incremental hash over one of the supported algorithms.
///
/// Implements `Write` so entry bytes can be streamed straight into it.
#[derive(Clone)]
pub(crate) enum Hash {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hash {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Hash::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hash::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Hash::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Hash::Sha512(Sha512::new()),
        }
    }

    pub fn update<T: AsRef<[u8]>>(&mut self, data: T) {
        let data = data.as_ref();
        match self {
            Hash::Sha1(h) => h.update(data),
            Hash::Sha256(h) => h.update(data),
            Hash::Sha384(h) => h.update(data),
            Hash::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hash::Sha1(h) => h.finalize().to_vec(),
            Hash::Sha256(h) => h.finalize().to_vec(),
            Hash::Sha384(h) => h.finalize().to_vec(),
            Hash::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

impl Write for Hash {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fans written bytes out to several hashes at once.
pub(crate) struct MultiHash {
    hashes: Vec<(DigestAlgorithm, Hash)>,
}

impl MultiHash {
    pub fn new(algorithms: impl IntoIterator<Item = DigestAlgorithm>) -> Self {
        let mut hashes: Vec<(DigestAlgorithm, Hash)> = Vec::new();
        for algorithm in algorithms {
            if !hashes.iter().any(|(a, _)| *a == algorithm) {
                hashes.push((algorithm, Hash::new(algorithm)));
            }
        }
        MultiHash { hashes }
    }

    pub fn finalize(self) -> Vec<(DigestAlgorithm, Vec<u8>)> {
        self.hashes
            .into_iter()
            .map(|(algorithm, hash)| (algorithm, hash.finalize()))
            .collect()
    }
}

impl Write for MultiHash {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for (_, hash) in self.hashes.iter_mut() {
            hash.update(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
