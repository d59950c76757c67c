//! Java KeyStore (`JKS`) reader.
//!
//! Only the certificates are extracted. Private key material is skipped
//! unread and the keyed SHA-1 trailer is not checked, which matches loading
//! the store without a password.

use std::io::{Cursor, Read};

use crate::error::*;
use crate::signature::Certificate;

const MAGIC_JKS: u32 = 0xfeed_feed;
const MAGIC_JCEKS: u32 = 0xcece_cece;

const TAG_PRIVATE_KEY: u32 = 1;
const TAG_TRUSTED_CERT: u32 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JksEntryKind {
    PrivateKey,
    TrustedCertificate,
}

#[derive(Debug, Clone)]
pub struct JksEntry {
    pub alias: String,
    pub kind: JksEntryKind,
    pub certificates: Vec<Certificate>,
}

struct JksReader<'a> {
    cursor: Cursor<&'a [u8]>,
    location: &'a str,
}

impl<'a> JksReader<'a> {
    fn truncated(&self) -> TrustStoreError {
        TrustStoreError::malformed(
            self.location,
            format!("truncated keystore at offset {}", self.cursor.position()),
        )
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TrustStoreError> {
        let mut buf = [0u8; N];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| self.truncated())?;
        Ok(buf)
    }

    fn u16(&mut self) -> Result<u16, TrustStoreError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn u32(&mut self) -> Result<u32, TrustStoreError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn u64(&mut self) -> Result<u64, TrustStoreError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, TrustStoreError> {
        if len > self.remaining() {
            return Err(self.truncated());
        }
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| self.truncated())?;
        Ok(buf)
    }

    /// `DataInput.readUTF`: u16 length, then modified UTF-8.
    fn utf(&mut self) -> Result<String, TrustStoreError> {
        let len = self.u16()? as usize;
        let bytes = self.bytes(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn certificate(&mut self, version: u32) -> Result<Certificate, TrustStoreError> {
        if version == 2 {
            let cert_type = self.utf()?;
            if cert_type != "X.509" {
                return Err(TrustStoreError::UnsupportedAlgorithm {
                    algorithm: cert_type,
                    location: self.location.to_string(),
                });
            }
        }
        let len = self.u32()? as usize;
        let der = self.bytes(len)?;
        Certificate::from_der(&der)
            .map_err(|e| TrustStoreError::malformed(self.location, e.to_string()))
    }
}

/// Parse a JKS keystore image.
pub fn parse(bytes: &[u8], location: &str) -> Result<Vec<JksEntry>, TrustStoreError> {
    let mut reader = JksReader {
        cursor: Cursor::new(bytes),
        location,
    };

    match reader.u32()? {
        MAGIC_JKS => {}
        MAGIC_JCEKS => {
            return Err(TrustStoreError::UnsupportedType {
                store_type: "JCEKS".to_string(),
                location: location.to_string(),
            })
        }
        _ if bytes.first() == Some(&0x30) => {
            return Err(TrustStoreError::UnsupportedType {
                store_type: "PKCS12".to_string(),
                location: location.to_string(),
            })
        }
        magic => {
            return Err(TrustStoreError::malformed(
                location,
                format!("invalid keystore format (magic 0x{:08x})", magic),
            ))
        }
    }
    let version = reader.u32()?;
    if version != 1 && version != 2 {
        return Err(TrustStoreError::malformed(
            location,
            format!("unsupported keystore version {}", version),
        ));
    }

    let count = reader.u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let tag = reader.u32()?;
        let alias = reader.utf()?;
        let _timestamp = reader.u64()?;
        let entry = match tag {
            TAG_PRIVATE_KEY => {
                let key_len = reader.u32()? as usize;
                reader.bytes(key_len)?;
                let chain_len = reader.u32()?;
                let mut certificates = Vec::new();
                for _ in 0..chain_len {
                    certificates.push(reader.certificate(version)?);
                }
                JksEntry {
                    alias,
                    kind: JksEntryKind::PrivateKey,
                    certificates,
                }
            }
            TAG_TRUSTED_CERT => JksEntry {
                alias,
                kind: JksEntryKind::TrustedCertificate,
                certificates: vec![reader.certificate(version)?],
            },
            other => {
                return Err(TrustStoreError::malformed(
                    location,
                    format!("unrecognized keystore entry tag {}", other),
                ))
            }
        };
        log::trace!(
            "{}: entry '{}' with {} certificate(s)",
            location,
            entry.alias,
            entry.certificates.len()
        );
        entries.push(entry);
    }
    Ok(entries)
}
