//! `META-INF/MANIFEST.MF` and signature file (`*.SF`) parsing.
//!
//! Both files share the same layout: a main section followed by sections
//! introduced by a `Name:` attribute, separated by blank lines. Every section
//! keeps its raw bytes, including the blank line that terminates it, since
//! that is what digests are computed over.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::*;
use crate::signature::DigestAlgorithm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: Option<String>,
    attributes: Vec<(String, String)>,
    raw: Vec<u8>,
}

impl Section {
    /// Value of the `Name:` attribute; `None` for the main section.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Attribute lookup, case-insensitive on the key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Attributes named `<ALG><suffix>` whose algorithm is supported, with
    /// their base64 values. Unknown algorithms are skipped.
    pub fn digest_attributes(&self, suffix: &str) -> Vec<(DigestAlgorithm, &str)> {
        let mut found = Vec::new();
        for (key, value) in &self.attributes {
            if key.len() <= suffix.len() {
                continue;
            }
            let split = key.len() - suffix.len();
            if !key.is_char_boundary(split) || !key[split..].eq_ignore_ascii_case(suffix) {
                continue;
            }
            match DigestAlgorithm::from_manifest_name(&key[..split]) {
                Some(algorithm) => found.push((algorithm, value.as_str())),
                None => log::warn!("Ignoring unsupported digest attribute '{}'", key),
            }
        }
        found
    }
}

/// Compare a base64 digest attribute against computed bytes.
pub(crate) fn digest_matches(expected_base64: &str, computed: &[u8]) -> bool {
    match BASE64.decode(expected_base64.trim()) {
        Ok(expected) => expected == computed,
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    bytes: Vec<u8>,
    main: Section,
    sections: Vec<Section>,
}

struct Line {
    start: usize,
    content_end: usize,
    end: usize,
}

fn split_lines(bytes: &[u8]) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(Line {
                    start,
                    content_end: i,
                    end: i + 1,
                });
                i += 1;
                start = i;
            }
            b'\r' => {
                let end = if bytes.get(i + 1) == Some(&b'\n') {
                    i + 2
                } else {
                    i + 1
                };
                lines.push(Line {
                    start,
                    content_end: i,
                    end,
                });
                i = end;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        lines.push(Line {
            start,
            content_end: bytes.len(),
            end: bytes.len(),
        });
    }
    lines
}

fn parse_section(bytes: &[u8], lines: &[Line], raw_end: usize) -> Result<Section, JarError> {
    let mut logical: Vec<Vec<u8>> = Vec::new();
    for line in lines {
        let content = &bytes[line.start..line.content_end];
        if let Some(continuation) = content.strip_prefix(b" ") {
            match logical.last_mut() {
                Some(last) => last.extend_from_slice(continuation),
                None => {
                    return Err(JarError::ManifestError(
                        "continuation line without a preceding header".to_string(),
                    ))
                }
            }
        } else {
            logical.push(content.to_vec());
        }
    }

    let mut attributes = Vec::with_capacity(logical.len());
    for line in logical {
        let line = String::from_utf8(line)
            .map_err(|_| JarError::ManifestError("header is not valid UTF-8".to_string()))?;
        let (key, value) = line.split_once(": ").ok_or_else(|| {
            JarError::ManifestError(format!("invalid header field: '{}'", line))
        })?;
        if key.is_empty() {
            return Err(JarError::ManifestError("empty header name".to_string()));
        }
        attributes.push((key.to_string(), value.to_string()));
    }

    let raw_start = lines.first().map(|l| l.start).unwrap_or(raw_end);
    let name = match attributes.first() {
        Some((key, value)) if key.eq_ignore_ascii_case("Name") => Some(value.clone()),
        _ => None,
    };
    Ok(Section {
        name,
        attributes,
        raw: bytes[raw_start..raw_end].to_vec(),
    })
}

impl Manifest {
    pub fn parse(bytes: Vec<u8>) -> Result<Self, JarError> {
        let lines = split_lines(&bytes);
        let mut groups: Vec<(usize, usize, usize)> = Vec::new();
        let mut group_start: Option<usize> = None;
        for (i, line) in lines.iter().enumerate() {
            let blank = line.start == line.content_end;
            match (blank, group_start) {
                (true, Some(first)) => {
                    groups.push((first, i, line.end));
                    group_start = None;
                }
                (true, None) => {}
                (false, None) => group_start = Some(i),
                (false, Some(_)) => {}
            }
        }
        if let Some(first) = group_start {
            groups.push((first, lines.len(), bytes.len()));
        }

        let mut parsed = Vec::with_capacity(groups.len());
        for (index, (first, last, raw_end)) in groups.into_iter().enumerate() {
            let mut section = parse_section(&bytes, &lines[first..last], raw_end)?;
            // The main section always starts at the top of the file, blank
            // lines before it included.
            if index == 0 {
                section.raw = bytes[..raw_end].to_vec();
            }
            parsed.push(section);
        }

        let mut parsed = parsed.into_iter();
        let main = match parsed.next() {
            Some(section) if section.name.is_none() => section,
            Some(section) => {
                return Err(JarError::ManifestError(format!(
                    "main attributes missing, found section '{}'",
                    section.name.unwrap_or_default()
                )))
            }
            None => Section {
                name: None,
                attributes: Vec::new(),
                raw: Vec::new(),
            },
        };
        let mut sections = Vec::new();
        for section in parsed {
            if section.name.is_none() {
                return Err(JarError::ManifestError(
                    "section without a Name attribute".to_string(),
                ));
            }
            sections.push(section);
        }

        Ok(Manifest {
            bytes,
            main,
            sections,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn main_attributes(&self) -> &Section {
        &self.main
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Per-entry section for `name`. If the name appears more than once the
    /// last section wins.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .rev()
            .find(|s| s.name.as_deref() == Some(name))
    }
}

/// A parsed `META-INF/*.SF` file.
#[derive(Debug, Clone)]
pub struct SignatureFile {
    name: String,
    contents: Manifest,
}

impl SignatureFile {
    pub fn parse(name: &str, bytes: Vec<u8>) -> Result<Self, JarError> {
        Ok(SignatureFile {
            name: name.to_string(),
            contents: Manifest::parse(bytes)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        self.contents.bytes()
    }

    /// Whether one of the `<ALG>-Digest-Manifest` values matches the whole
    /// manifest.
    fn manifest_signed(&self, manifest: &Manifest) -> bool {
        self.contents
            .main_attributes()
            .digest_attributes("-Digest-Manifest")
            .into_iter()
            .any(|(algorithm, value)| digest_matches(value, &algorithm.digest(manifest.bytes())))
    }

    /// Whether every `<ALG>-Digest-Manifest-Main-Attributes` value matches
    /// the manifest's main section. Absent attributes pass.
    fn main_attributes_signed(&self, manifest: &Manifest) -> bool {
        self.contents
            .main_attributes()
            .digest_attributes("-Digest-Manifest-Main-Attributes")
            .into_iter()
            .all(|(algorithm, value)| {
                digest_matches(value, &algorithm.digest(manifest.main_attributes().raw()))
            })
    }

    /// Check one signature file section against the manifest. Returns
    /// whether a supported digest was verified; a mismatching digest or a
    /// missing manifest section is an integrity violation.
    fn section_signed(&self, section: &Section, manifest: &Manifest) -> Result<bool, JarError> {
        let name = section.name().unwrap_or_default();
        let digests = section.digest_attributes("-Digest");
        if digests.is_empty() {
            return Ok(false);
        }
        let target = manifest.section(name).ok_or_else(|| {
            JarError::integrity(
                &self.name,
                format!("no manifest section for signature file entry {}", name),
            )
        })?;
        for (algorithm, value) in digests {
            if !digest_matches(value, &algorithm.digest(target.raw())) {
                return Err(JarError::integrity(
                    &self.name,
                    format!("invalid {} signature file digest for {}", algorithm, name),
                ));
            }
        }
        Ok(true)
    }

    /// Names of the manifest sections this signature file vouches for.
    /// A section digest mismatch fails the whole archive instead of leaving
    /// that entry unsigned.
    pub fn signed_names(&self, manifest: &Manifest) -> Result<Vec<String>, JarError> {
        let manifest_signed = self.manifest_signed(manifest);
        if !manifest_signed && !self.main_attributes_signed(manifest) {
            return Err(JarError::integrity(
                &self.name,
                "invalid signature file digest for manifest main attributes",
            ));
        }
        log::debug!(
            "{}: whole manifest {}",
            self.name,
            if manifest_signed {
                "signed"
            } else {
                "not signed, checking sections"
            }
        );

        let mut names = Vec::new();
        for section in self.contents.sections() {
            if manifest_signed || self.section_signed(section, manifest)? {
                if let Some(name) = section.name() {
                    names.push(normalize_entry_name(name).to_string());
                }
            }
        }
        Ok(names)
    }
}

/// Strip a leading `./` or `/` from a signed entry name.
pub(crate) fn normalize_entry_name(name: &str) -> &str {
    let name = name.strip_prefix("./").unwrap_or(name);
    name.strip_prefix('/').unwrap_or(name)
}
