//! Fixtures shared by the integration tests: certificates, signed jars and
//! keystore images built on the fly.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const OID_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
const OID_SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
const OID_CONTENT_TYPE: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03];
const OID_MESSAGE_DIGEST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_ECDSA_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x100 {
        out.extend_from_slice(&[0x81, len as u8]);
    } else if len < 0x10000 {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    } else {
        out.extend_from_slice(&[0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

fn algorithm(oid: &[u8]) -> Vec<u8> {
    tlv(0x30, &tlv(0x06, oid))
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

pub fn b64_sha256(data: &[u8]) -> String {
    BASE64.encode(sha256(data))
}

/// A P-256 key and the certificate that carries it.
pub struct TestSigner {
    pub key_pair: KeyPair,
    pub cert_der: Vec<u8>,
    /// Issuer certificates, leaf issuer first.
    pub issuers: Vec<Vec<u8>>,
}

impl TestSigner {
    pub fn self_signed(common_name: &str) -> Self {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let cert = params.self_signed(&key_pair).unwrap();
        TestSigner {
            key_pair,
            cert_der: cert.der().to_vec(),
            issuers: Vec::new(),
        }
    }

    /// A leaf certificate issued by a fresh CA. Returns the signer and the
    /// CA certificate.
    pub fn issued_by_new_ca(common_name: &str, ca_name: &str) -> (Self, Vec<u8>) {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, ca_name);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let cert = params.signed_by(&key_pair, &ca_cert, &ca_key).unwrap();

        let ca_der = ca_cert.der().to_vec();
        (
            TestSigner {
                key_pair,
                cert_der: cert.der().to_vec(),
                issuers: vec![ca_der.clone()],
            },
            ca_der,
        )
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let key = SigningKey::from_pkcs8_der(&self.key_pair.serialize_der()).unwrap();
        let signature: Signature = key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }

    pub fn certificate(&self) -> jarverify::Certificate {
        jarverify::Certificate::from_der(&self.cert_der).unwrap()
    }

    fn issuer_and_serial(&self) -> Vec<u8> {
        let cert = self.certificate();
        let mut body = cert.issuer_raw().to_vec();
        body.extend(tlv(0x02, cert.serial_raw()));
        tlv(0x30, &body)
    }
}

/// Build a PKCS#7 SignedData block over `content`.
pub fn signature_block(signer: &TestSigner, content: &[u8], signed_attributes: bool) -> Vec<u8> {
    let mut signer_info = tlv(0x02, &[1]);
    signer_info.extend(signer.issuer_and_serial());
    signer_info.extend(algorithm(OID_SHA256));
    let signature = if signed_attributes {
        let mut attrs = tlv(
            0x30,
            &[tlv(0x06, OID_CONTENT_TYPE), tlv(0x31, &tlv(0x06, OID_DATA))].concat(),
        );
        attrs.extend(tlv(
            0x30,
            &[
                tlv(0x06, OID_MESSAGE_DIGEST),
                tlv(0x31, &tlv(0x04, &sha256(content))),
            ]
            .concat(),
        ));
        signer_info.extend(tlv(0xa0, &attrs));
        signer.sign(&tlv(0x31, &attrs))
    } else {
        signer.sign(content)
    };
    signer_info.extend(algorithm(OID_ECDSA_SHA256));
    signer_info.extend(tlv(0x04, &signature));

    // SET OF in DER order.
    let mut encoded: Vec<&[u8]> = vec![signer.cert_der.as_slice()];
    encoded.extend(signer.issuers.iter().map(Vec::as_slice));
    encoded.sort();
    let certificates = encoded.concat();

    let mut signed_data = tlv(0x02, &[1]);
    signed_data.extend(tlv(0x31, &algorithm(OID_SHA256)));
    signed_data.extend(tlv(0x30, &tlv(0x06, OID_DATA)));
    signed_data.extend(tlv(0xa0, &certificates));
    signed_data.extend(tlv(0x31, &tlv(0x30, &signer_info)));

    let mut content_info = tlv(0x06, OID_SIGNED_DATA);
    content_info.extend(tlv(0xa0, &tlv(0x30, &signed_data)));
    tlv(0x30, &content_info)
}

/// A manifest with one SHA-256 section per entry. Returns the manifest and
/// the raw bytes of each section.
pub fn manifest(entries: &[(&str, &[u8])]) -> (Vec<u8>, Vec<(String, Vec<u8>)>) {
    let mut out = b"Manifest-Version: 1.0\r\nCreated-By: jarverify tests\r\n\r\n".to_vec();
    let mut sections = Vec::new();
    for (name, data) in entries {
        let section = format!("Name: {}\r\nSHA-256-Digest: {}\r\n\r\n", name, b64_sha256(data));
        out.extend_from_slice(section.as_bytes());
        sections.push((name.to_string(), section.into_bytes()));
    }
    (out, sections)
}

/// A signature file covering the whole manifest and every section.
pub fn signature_file(manifest: &[u8], sections: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut out = format!(
        "Signature-Version: 1.0\r\nSHA-256-Digest-Manifest: {}\r\nCreated-By: jarverify tests\r\n\r\n",
        b64_sha256(manifest)
    )
    .into_bytes();
    for (name, raw) in sections {
        out.extend_from_slice(
            format!("Name: {}\r\nSHA-256-Digest: {}\r\n\r\n", name, b64_sha256(raw)).as_bytes(),
        );
    }
    out
}

pub fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in files {
        if name.ends_with('/') {
            writer
                .add_directory(name.to_string(), FileOptions::<()>::default())
                .unwrap();
            continue;
        }
        let method = if name.ends_with(".class") {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        writer
            .start_file(name.to_string(), FileOptions::<()>::default().compression_method(method))
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

#[derive(Default)]
pub struct JarOptions<'a> {
    /// Entries stored in the jar without a manifest section.
    pub unsigned: Vec<(&'a str, &'a [u8])>,
    /// Replace the content of a signed entry after signing.
    pub tamper: Option<(&'a str, &'a [u8])>,
    pub signed_attributes: bool,
}

/// Write a jar whose `signed` entries are covered by `signer`.
pub fn write_signed_jar(
    path: &Path,
    signer: &TestSigner,
    signed: &[(&str, &[u8])],
    options: JarOptions<'_>,
) {
    let (manifest, sections) = manifest(signed);
    let sf = signature_file(&manifest, &sections);
    let block = signature_block(signer, &sf, options.signed_attributes);

    let mut files: Vec<(&str, &[u8])> = vec![
        ("META-INF/MANIFEST.MF", manifest.as_slice()),
        ("META-INF/SIGNER.SF", sf.as_slice()),
        ("META-INF/SIGNER.EC", block.as_slice()),
    ];
    for &(name, data) in signed {
        match options.tamper {
            Some((tampered, replacement)) if tampered == name => files.push((name, replacement)),
            _ => files.push((name, data)),
        }
    }
    files.extend(options.unsigned.iter().copied());
    write_zip(path, &files);
}

/// A jar with a manifest but no signature files.
pub fn write_unsigned_jar(path: &Path, entries: &[(&str, &[u8])]) {
    let (manifest, _) = manifest(entries);
    let mut files: Vec<(&str, &[u8])> = vec![("META-INF/MANIFEST.MF", manifest.as_slice())];
    files.extend_from_slice(entries);
    write_zip(path, &files);
}

fn put_utf(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// A JKS image holding each certificate as a trusted certificate entry.
pub fn jks(certificates: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xFEED_FEEDu32.to_be_bytes());
    out.extend_from_slice(&2u32.to_be_bytes());
    out.extend_from_slice(&(certificates.len() as u32).to_be_bytes());
    for (i, der) in certificates.iter().enumerate() {
        out.extend_from_slice(&2u32.to_be_bytes());
        put_utf(&mut out, &format!("cert{}", i));
        out.extend_from_slice(&0u64.to_be_bytes());
        put_utf(&mut out, "X.509");
        out.extend_from_slice(&(der.len() as u32).to_be_bytes());
        out.extend_from_slice(der);
    }
    out.extend_from_slice(&[0u8; 20]);
    out
}

pub fn pem(certificates: &[&[u8]]) -> String {
    certificates
        .iter()
        .map(|der| pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec())))
        .collect()
}
