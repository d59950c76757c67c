//! Signed archive reading.
//!
//! An archive is scanned once, in central directory order. Every entry is
//! read to the end. Entries covered by a signature file are streamed through
//! the digests their manifest section declares, so tampering is detected
//! while the bytes are consumed. Manifest digests of entries no signature
//! file covers are not checked.

mod manifest;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use zip::ZipArchive;

pub use manifest::{Manifest, Section, SignatureFile};

use crate::error::*;
use crate::progress::{CancellationToken, ProgressSink};
use crate::signature::{verify_block, CertificateChain, CertificateEntries, MultiHash};
use manifest::{digest_matches, normalize_entry_name};

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

const BLOCK_EXTENSIONS: [&str; 3] = ["RSA", "DSA", "EC"];

/// One archive entry as seen during the scan.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    /// Uncompressed length in bytes.
    pub size: u64,
    /// Concatenated chains of every signer covering the entry; empty if the
    /// entry is unsigned.
    pub chain: CertificateChain,
}

impl ArchiveEntry {
    pub fn is_signed(&self) -> bool {
        !self.chain.is_empty()
    }
}

/// Outcome of the integrity phase for an archive that was read completely.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntegrityStatus {
    NotSigned,
    Verified,
}

#[derive(Debug, Clone)]
pub struct ArchiveScan {
    pub entries: Vec<ArchiveEntry>,
    pub manifest_present: bool,
}

impl ArchiveScan {
    pub fn integrity(&self) -> IntegrityStatus {
        if self.manifest_present && self.entries.iter().any(ArchiveEntry::is_signed) {
            IntegrityStatus::Verified
        } else {
            IntegrityStatus::NotSigned
        }
    }

    /// Distinct non-empty chains over all entries.
    pub fn certificate_entries(&self) -> CertificateEntries {
        self.entries.iter().map(|e| e.chain.clone()).collect()
    }

    pub fn signed_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| e.is_signed())
    }
}

/// Whether `name` is the manifest or one of the signature files and blocks
/// stored directly under `META-INF/`.
pub fn is_signature_related(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let Some(file) = upper.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    file == "MANIFEST.MF" || file.ends_with(".SF") || block_extension(file).is_some()
}

/// Extension of a signature block file name (upper case, without the
/// `META-INF/` prefix), if it is one.
fn block_extension(file: &str) -> Option<&str> {
    let (base, ext) = file.rsplit_once('.')?;
    if base.is_empty() {
        return None;
    }
    if BLOCK_EXTENSIONS.contains(&ext) {
        return Some(ext);
    }
    let custom = file.starts_with("SIG-")
        && ext != "SF"
        && (1..=3).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    custom.then_some(ext)
}

/// Upper-case base name shared by a signature file and its block:
/// `META-INF/CERT.SF` and `META-INF/CERT.RSA` both map to `CERT`.
fn signer_base(name: &str) -> Option<(String, bool)> {
    let upper = name.to_ascii_uppercase();
    let file = upper.strip_prefix("META-INF/")?;
    if file.contains('/') {
        return None;
    }
    let (base, ext) = file.rsplit_once('.')?;
    if ext == "SF" {
        return Some((base.to_string(), false));
    }
    block_extension(file).map(|_| (base.to_string(), true))
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
) -> Result<Vec<u8>, JarError> {
    let mut file = archive.by_index(index)?;
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

struct EntryInfo {
    name: String,
    size: u64,
    is_dir: bool,
}

/// Signers keyed by the entry names their signature file covers.
type SignerMap = HashMap<String, Vec<CertificateChain>>;

fn collect_signers<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    infos: &[EntryInfo],
    manifest: &Manifest,
) -> Result<SignerMap, JarError> {
    let mut signature_files: HashMap<String, usize> = HashMap::new();
    let mut blocks: Vec<(String, usize)> = Vec::new();
    for (index, info) in infos.iter().enumerate() {
        match signer_base(&info.name) {
            Some((base, true)) => blocks.push((base, index)),
            Some((base, false)) => {
                signature_files.entry(base).or_insert(index);
            }
            None => {}
        }
    }

    let mut signers: SignerMap = HashMap::new();
    for (base, block_index) in blocks {
        let Some(&sf_index) = signature_files.get(&base) else {
            log::debug!("{}: no matching signature file", infos[block_index].name);
            continue;
        };
        let sf_name = &infos[sf_index].name;
        let block_name = &infos[block_index].name;
        let sf = SignatureFile::parse(sf_name, read_entry(archive, sf_index)?)?;
        let block = read_entry(archive, block_index)?;

        let chains = verify_block(block_name, &block, sf.bytes())?;
        let mut signer_chain = CertificateChain::default();
        for chain in &chains {
            signer_chain.append(chain);
        }
        let names = sf.signed_names(manifest)?;
        log::debug!(
            "{}: {} signer(s), {} signed name(s)",
            sf.name(),
            chains.len(),
            names.len()
        );
        for name in names {
            signers.entry(name).or_default().push(signer_chain.clone());
        }
    }
    Ok(signers)
}

fn read_error(name: &str, err: io::Error, signed: bool) -> JarError {
    if signed && err.kind() == io::ErrorKind::InvalidData {
        JarError::integrity(name, err.to_string())
    } else {
        JarError::IOError(err)
    }
}

/// Scan the archive at `path`, checking the digests of signed entries
/// against the manifest and collecting the certificate chain of every entry.
/// A signed entry whose manifest section has no supported digest is an
/// integrity violation.
///
/// Cancellation is checked before each entry; a cancelled scan returns
/// `JarError::Cancelled` and nothing else.
pub fn read_and_collect(
    path: &Path,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<ArchiveScan, JarError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let mut infos = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        infos.push(EntryInfo {
            name: entry.name().to_string(),
            size: entry.size(),
            is_dir: entry.is_dir(),
        });
    }

    let manifest_index = infos
        .iter()
        .position(|info| info.name.eq_ignore_ascii_case(MANIFEST_NAME));
    let manifest = match manifest_index {
        Some(index) => Some(Manifest::parse(read_entry(&mut archive, index)?)?),
        None => None,
    };
    let signers = match &manifest {
        Some(manifest) => collect_signers(&mut archive, &infos, manifest)?,
        None => SignerMap::new(),
    };
    let signed = !signers.is_empty();
    log::debug!(
        "{}: {} entries, manifest {}, {} signed name(s)",
        path.display(),
        infos.len(),
        if manifest.is_some() { "present" } else { "absent" },
        signers.len()
    );

    progress.begin(&path.display().to_string(), infos.len());
    let mut entries = Vec::with_capacity(infos.len());
    for (index, info) in infos.iter().enumerate() {
        if cancel.is_cancelled() {
            log::debug!("{}: cancelled after {} entries", path.display(), index);
            return Err(JarError::Cancelled);
        }
        progress.worked(1);

        let covering = if info.is_dir || is_signature_related(&info.name) {
            None
        } else {
            signers.get(normalize_entry_name(&info.name))
        };
        let digests = match (covering, &manifest) {
            (Some(_), Some(manifest)) => {
                let digests = manifest
                    .section(&info.name)
                    .map(|s| s.digest_attributes("-Digest"))
                    .unwrap_or_default();
                if digests.is_empty() {
                    return Err(JarError::integrity(&info.name, "digest missing"));
                }
                digests
            }
            _ => Vec::new(),
        };

        // Unsigned entries are still read to the end.
        let mut sink = MultiHash::new(digests.iter().map(|(algorithm, _)| *algorithm));
        {
            let mut file = archive.by_index(index)?;
            io::copy(&mut file, &mut sink).map_err(|e| read_error(&info.name, e, signed))?;
        }
        let computed = sink.finalize();
        for (algorithm, expected) in &digests {
            let matches = computed
                .iter()
                .any(|(a, value)| a == algorithm && digest_matches(expected, value));
            if !matches {
                return Err(JarError::integrity(
                    &info.name,
                    format!("{} digest error", algorithm),
                ));
            }
        }

        let mut chain = CertificateChain::default();
        for signer_chain in covering.into_iter().flatten() {
            chain.append(signer_chain);
        }
        log::trace!("{}: {} certificate(s)", info.name, chain.len());
        entries.push(ArchiveEntry {
            name: info.name.clone(),
            size: info.size,
            chain,
        });
    }
    progress.done();

    Ok(ArchiveScan {
        entries,
        manifest_present: manifest.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_related_names() {
        assert!(is_signature_related("META-INF/MANIFEST.MF"));
        assert!(is_signature_related("meta-inf/cert.sf"));
        assert!(is_signature_related("META-INF/CERT.RSA"));
        assert!(is_signature_related("META-INF/CERT.EC"));
        assert!(is_signature_related("META-INF/SIG-FOO.ABC"));
        assert!(!is_signature_related("META-INF/SIG-FOO.LONGEXT"));
        assert!(!is_signature_related("META-INF/services/CERT.RSA"));
        assert!(!is_signature_related("META-INF/maven/pom.xml"));
        assert!(!is_signature_related("com/example/Main.class"));
    }

    #[test]
    fn test_signer_base() {
        assert_eq!(
            signer_base("META-INF/CERT.SF"),
            Some(("CERT".to_string(), false))
        );
        assert_eq!(
            signer_base("META-INF/cert.rsa"),
            Some(("CERT".to_string(), true))
        );
        assert_eq!(
            signer_base("META-INF/SIG-X.P7"),
            Some(("SIG-X".to_string(), true))
        );
        assert_eq!(signer_base("META-INF/MANIFEST.MF"), None);
        assert_eq!(signer_base("META-INF/.RSA"), None);
    }

    #[test]
    fn test_read_error_mapping() {
        let crc = || io::Error::new(io::ErrorKind::InvalidData, "Invalid checksum");
        assert!(matches!(
            read_error("a", crc(), true),
            JarError::IntegrityViolation { .. }
        ));
        assert!(matches!(read_error("a", crc(), false), JarError::IOError(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut progress = crate::progress::NullProgress;
        let result = read_and_collect(
            Path::new("/nonexistent/archive.jar"),
            &mut progress,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(JarError::IOError(_))));
    }
}
