//! Verification of a signature block over its signature file.

use ed25519_compact as ed25519;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use rsa::pkcs8::DecodePublicKey;
use rsa::Pkcs1v15Sign;

use spki::der::asn1::ObjectIdentifier;
use spki::der::Decode;
use spki::SubjectPublicKeyInfoRef;

use super::certificate::{build_chain, Certificate, CertificateChain};
use super::hash::DigestAlgorithm;
use super::pkcs7::{SignedData, SignerInfo};
use crate::error::*;

const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const OID_SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_SHA384_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const OID_SHA512_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_ECDSA_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.1");
const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_ECDSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const OID_CURVE_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_CURVE_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

const RSA_SIGNATURES: [ObjectIdentifier; 5] = [
    OID_RSA_ENCRYPTION,
    OID_SHA1_WITH_RSA,
    OID_SHA256_WITH_RSA,
    OID_SHA384_WITH_RSA,
    OID_SHA512_WITH_RSA,
];
const ECDSA_SIGNATURES: [ObjectIdentifier; 5] = [
    OID_EC_PUBLIC_KEY,
    OID_ECDSA_SHA1,
    OID_ECDSA_SHA256,
    OID_ECDSA_SHA384,
    OID_ECDSA_SHA512,
];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum KeyFamily {
    Rsa,
    Ecdsa,
    Ed25519,
}

fn signature_family(oid: ObjectIdentifier) -> Result<KeyFamily, JarError> {
    if RSA_SIGNATURES.contains(&oid) {
        Ok(KeyFamily::Rsa)
    } else if ECDSA_SIGNATURES.contains(&oid) {
        Ok(KeyFamily::Ecdsa)
    } else if oid == OID_ED25519 {
        Ok(KeyFamily::Ed25519)
    } else {
        Err(JarError::UnsupportedAlgorithm(format!(
            "signature algorithm {}",
            oid
        )))
    }
}

enum PublicKey {
    Rsa(rsa::RsaPublicKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    Ed25519(ed25519::PublicKey),
}

impl PublicKey {
    fn from_certificate(certificate: &Certificate) -> Result<Self, JarError> {
        let spki = certificate.spki_raw();
        let info = SubjectPublicKeyInfoRef::from_der(spki)?;
        let key_bytes = info.subject_public_key.raw_bytes();

        let invalid = |e: &dyn std::fmt::Display| {
            JarError::SignatureBlockError(format!(
                "invalid public key in certificate '{}': {}",
                certificate.subject(),
                e
            ))
        };

        let key_oid = info.algorithm.oid;
        if key_oid == OID_RSA_ENCRYPTION {
            rsa::RsaPublicKey::from_public_key_der(spki)
                .map(PublicKey::Rsa)
                .map_err(|e| invalid(&e))
        } else if key_oid == OID_EC_PUBLIC_KEY {
            let curve = info.algorithm.parameters_oid().map_err(|e| invalid(&e))?;
            if curve == OID_CURVE_P256 {
                p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(PublicKey::P256)
                    .map_err(|e| invalid(&e))
            } else if curve == OID_CURVE_P384 {
                p384::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
                    .map(PublicKey::P384)
                    .map_err(|e| invalid(&e))
            } else {
                Err(JarError::UnsupportedAlgorithm(format!(
                    "elliptic curve {}",
                    curve
                )))
            }
        } else if key_oid == OID_ED25519 {
            ed25519::PublicKey::from_slice(key_bytes)
                .map(PublicKey::Ed25519)
                .map_err(|e| invalid(&e))
        } else {
            Err(JarError::UnsupportedAlgorithm(format!(
                "public key algorithm {}",
                key_oid
            )))
        }
    }

    fn family(&self) -> KeyFamily {
        match self {
            PublicKey::Rsa(_) => KeyFamily::Rsa,
            PublicKey::P256(_) | PublicKey::P384(_) => KeyFamily::Ecdsa,
            PublicKey::Ed25519(_) => KeyFamily::Ed25519,
        }
    }

    fn verify(&self, digest: DigestAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Rsa(key) => {
                let hashed = digest.digest(message);
                key.verify(pkcs1v15(digest), &hashed, signature).is_ok()
            }
            PublicKey::P256(key) => p256::ecdsa::Signature::from_der(signature)
                .map(|sig| key.verify_prehash(&digest.digest(message), &sig).is_ok())
                .unwrap_or(false),
            PublicKey::P384(key) => p384::ecdsa::Signature::from_der(signature)
                .map(|sig| key.verify_prehash(&digest.digest(message), &sig).is_ok())
                .unwrap_or(false),
            PublicKey::Ed25519(key) => ed25519::Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false),
        }
    }
}

fn pkcs1v15(digest: DigestAlgorithm) -> Pkcs1v15Sign {
    match digest {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

/// The inner `Err` carries the reason a signer did not verify.
fn check_signer(
    signed_data: &SignedData,
    signer: &SignerInfo,
    content: &[u8],
) -> Result<Result<CertificateChain, String>, JarError> {
    let digest = DigestAlgorithm::from_oid(signer.digest_algorithm.as_bytes()).ok_or_else(|| {
        JarError::UnsupportedAlgorithm(format!("digest algorithm {}", signer.digest_algorithm))
    })?;
    let family = signature_family(signer.signature_algorithm)?;

    let certificate = match signed_data.signer_certificate(signer) {
        Some(certificate) => certificate,
        None => return Ok(Err("signer certificate not found in block".to_string())),
    };
    let key = PublicKey::from_certificate(certificate)?;
    if key.family() != family {
        return Ok(Err(format!(
            "signature algorithm {} does not match the signer key",
            signer.signature_algorithm
        )));
    }

    let message = match signer.signed_attributes_for_signature()? {
        Some(attributes) => {
            let expected = match signer.message_digest()? {
                Some(expected) => expected,
                None => return Ok(Err("messageDigest attribute missing".to_string())),
            };
            if digest.digest(content) != expected {
                return Ok(Err("messageDigest does not match signature file".to_string()));
            }
            attributes
        }
        None => content.to_vec(),
    };

    if !key.verify(digest, &message, &signer.signature) {
        return Ok(Err(format!(
            "signature by '{}' does not verify",
            certificate.subject()
        )));
    }
    Ok(Ok(build_chain(certificate, &signed_data.certificates)))
}

/// Verify the signature block `block_name` over the signature file bytes.
///
/// Returns the certificate chain of every signer whose signature verifies.
/// Signers that fail are skipped; if none verifies the signature file is
/// reported as an integrity violation. Unsupported algorithms are errors
/// of their own.
pub fn verify_block(
    block_name: &str,
    block: &[u8],
    signature_file: &[u8],
) -> Result<Vec<CertificateChain>, JarError> {
    let signed_data = SignedData::from_der(block)?;
    let mut chains = Vec::new();
    let mut first_failure = None;
    for signer in &signed_data.signers {
        match check_signer(&signed_data, signer, signature_file)? {
            Ok(chain) => chains.push(chain),
            Err(reason) => {
                log::debug!("{}: signer skipped: {}", block_name, reason);
                first_failure.get_or_insert(reason);
            }
        }
    }
    if chains.is_empty() {
        let reason = first_failure.unwrap_or_else(|| "no signer verified".to_string());
        return Err(JarError::integrity(
            block_name,
            format!("cannot verify signature block file: {}", reason),
        ));
    }
    Ok(chains)
}
