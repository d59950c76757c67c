//! PKCS#7 `SignedData` as found in `META-INF/*.RSA`, `*.DSA`, `*.EC` and
//! `SIG-*` signature blocks.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{self, SignedAttributes};
use spki::der::asn1::{ObjectIdentifier, OctetString};
use spki::der::{Decode, Encode};

use super::certificate::Certificate;
use crate::error::*;

const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const OID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// How a `SignerInfo` names its certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerIdentifier {
    /// DER encoding of the issuer `Name` and the serial number content octets.
    IssuerAndSerial { issuer: Vec<u8>, serial: Vec<u8> },
    SubjectKeyId(Vec<u8>),
}

impl SignerIdentifier {
    fn from_cms(sid: &signed_data::SignerIdentifier) -> Result<Self, JarError> {
        Ok(match sid {
            signed_data::SignerIdentifier::IssuerAndSerialNumber(id) => {
                SignerIdentifier::IssuerAndSerial {
                    issuer: id.issuer.to_der()?,
                    serial: id.serial_number.as_bytes().to_vec(),
                }
            }
            signed_data::SignerIdentifier::SubjectKeyIdentifier(ski) => {
                SignerIdentifier::SubjectKeyId(ski.0.as_bytes().to_vec())
            }
        })
    }

    pub fn matches(&self, certificate: &Certificate) -> bool {
        match self {
            SignerIdentifier::IssuerAndSerial { issuer, serial } => {
                certificate.issuer_raw() == issuer.as_slice()
                    && certificate.serial_raw() == serial.as_slice()
            }
            SignerIdentifier::SubjectKeyId(id) => {
                certificate.subject_key_id() == Some(id.as_slice())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignerInfo {
    pub identifier: SignerIdentifier,
    pub digest_algorithm: ObjectIdentifier,
    pub signed_attributes: Option<SignedAttributes>,
    pub signature_algorithm: ObjectIdentifier,
    pub signature: Vec<u8>,
}

impl SignerInfo {
    fn from_cms(info: &signed_data::SignerInfo) -> Result<Self, JarError> {
        Ok(SignerInfo {
            identifier: SignerIdentifier::from_cms(&info.sid)?,
            digest_algorithm: info.digest_alg.oid,
            signed_attributes: info.signed_attrs.clone(),
            signature_algorithm: info.signature_algorithm.oid,
            signature: info.signature.as_bytes().to_vec(),
        })
    }

    /// Bytes the signature was computed over when signed attributes are
    /// present: the attributes encoded as a `SET OF`.
    pub fn signed_attributes_for_signature(&self) -> Result<Option<Vec<u8>>, JarError> {
        match &self.signed_attributes {
            Some(attributes) => Ok(Some(attributes.to_der()?)),
            None => Ok(None),
        }
    }

    /// Value of the `messageDigest` authenticated attribute.
    pub fn message_digest(&self) -> Result<Option<Vec<u8>>, JarError> {
        let Some(attributes) = &self.signed_attributes else {
            return Ok(None);
        };
        let attribute = attributes.iter().find(|a| a.oid == OID_MESSAGE_DIGEST);
        let Some(value) = attribute.and_then(|a| a.values.iter().next()) else {
            return Ok(None);
        };
        let digest = OctetString::from_der(&value.to_der()?)?;
        Ok(Some(digest.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone)]
pub struct SignedData {
    pub certificates: Vec<Certificate>,
    pub signers: Vec<SignerInfo>,
}

impl SignedData {
    /// Parse a DER `ContentInfo` wrapping `SignedData`.
    pub fn from_der(bytes: &[u8]) -> Result<Self, JarError> {
        let content_info = ContentInfo::from_der(bytes)?;
        if content_info.content_type != OID_SIGNED_DATA {
            return Err(JarError::SignatureBlockError(format!(
                "content type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed_data = content_info
            .content
            .decode_as::<signed_data::SignedData>()?;

        let mut certificates = Vec::new();
        if let Some(set) = &signed_data.certificates {
            for choice in set.0.iter() {
                // Attribute certificates and other formats are not used by jar signers.
                if let CertificateChoices::Certificate(certificate) = choice {
                    certificates.push(Certificate::from_der(&certificate.to_der()?)?);
                }
            }
        }

        let signers = signed_data
            .signer_infos
            .0
            .iter()
            .map(SignerInfo::from_cms)
            .collect::<Result<Vec<_>, _>>()?;
        if signers.is_empty() {
            return Err(JarError::SignatureBlockError(
                "signature block has no signers".to_string(),
            ));
        }

        Ok(SignedData {
            certificates,
            signers,
        })
    }

    /// Certificate named by a signer, looked up among the embedded ones.
    pub fn signer_certificate(&self, signer: &SignerInfo) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|c| signer.identifier.matches(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQUENCE: u8 = 0x30;
    const SET: u8 = 0x31;
    const INTEGER: u8 = 0x02;
    const OCTET_STRING: u8 = 0x04;
    const OID: u8 = 0x06;
    const CONTEXT_0: u8 = 0xa0;

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = content.len();
        if len < 0x80 {
            out.push(len as u8);
        } else if len < 0x100 {
            out.extend_from_slice(&[0x81, len as u8]);
        } else {
            out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
        }
        out.extend_from_slice(content);
        out
    }

    fn oid(value: &ObjectIdentifier) -> Vec<u8> {
        tlv(OID, value.as_bytes())
    }

    fn signer_info(attrs: Option<Vec<u8>>) -> Vec<u8> {
        let issuer = tlv(SEQUENCE, &[]);
        let serial = tlv(INTEGER, &[0x2a]);
        let sha256 = tlv(
            SEQUENCE,
            &tlv(OID, crate::signature::hash::DigestAlgorithm::Sha256.oid()),
        );
        let mut body = tlv(INTEGER, &[1]);
        body.extend(tlv(SEQUENCE, &[issuer, serial].concat()));
        body.extend(sha256.clone());
        if let Some(attrs) = attrs {
            body.extend(attrs);
        }
        body.extend(sha256);
        body.extend(tlv(OCTET_STRING, b"sig"));
        tlv(SEQUENCE, &body)
    }

    fn content_info(content_type: &ObjectIdentifier, signer: Option<Vec<u8>>) -> Vec<u8> {
        let data = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
        let mut sd = tlv(INTEGER, &[1]);
        sd.extend(tlv(SET, &[]));
        sd.extend(tlv(SEQUENCE, &oid(&data)));
        sd.extend(tlv(SET, &signer.unwrap_or_default()));
        let mut ci = oid(content_type);
        ci.extend(tlv(CONTEXT_0, &tlv(SEQUENCE, &sd)));
        tlv(SEQUENCE, &ci)
    }

    #[test]
    fn test_parse_signer_without_attributes() {
        let block = content_info(&OID_SIGNED_DATA, Some(signer_info(None)));
        let sd = SignedData::from_der(&block).unwrap();
        assert!(sd.certificates.is_empty());
        assert_eq!(sd.signers.len(), 1);
        let signer = &sd.signers[0];
        assert_eq!(signer.signature, b"sig");
        assert!(signer.signed_attributes.is_none());
        assert_eq!(signer.message_digest().unwrap(), None);
        assert_eq!(signer.signed_attributes_for_signature().unwrap(), None);
        assert!(matches!(
            &signer.identifier,
            SignerIdentifier::IssuerAndSerial { serial, .. } if serial == &[0x2a]
        ));
        assert_eq!(
            signer.digest_algorithm.to_string(),
            "2.16.840.1.101.3.4.2.1"
        );
    }

    #[test]
    fn test_message_digest_attribute() {
        let mut attribute = oid(&OID_MESSAGE_DIGEST);
        attribute.extend(tlv(SET, &tlv(OCTET_STRING, &[7u8; 32])));
        let attrs = tlv(CONTEXT_0, &tlv(SEQUENCE, &attribute));
        let block = content_info(&OID_SIGNED_DATA, Some(signer_info(Some(attrs.clone()))));

        let sd = SignedData::from_der(&block).unwrap();
        let signer = &sd.signers[0];
        assert_eq!(signer.message_digest().unwrap(), Some(vec![7u8; 32]));
        let signed = signer.signed_attributes_for_signature().unwrap().unwrap();
        assert_eq!(signed[0], SET);
        assert_eq!(&signed[1..], &attrs[1..]);
    }

    #[test]
    fn test_rejects_other_content_type() {
        let data = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
        let block = content_info(&data, Some(signer_info(None)));
        assert!(matches!(
            SignedData::from_der(&block),
            Err(JarError::SignatureBlockError(_))
        ));
    }

    #[test]
    fn test_rejects_block_without_signers() {
        let block = content_info(&OID_SIGNED_DATA, None);
        assert!(matches!(
            SignedData::from_der(&block),
            Err(JarError::SignatureBlockError(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_block() {
        let block = content_info(&OID_SIGNED_DATA, Some(signer_info(None)));
        assert!(matches!(
            SignedData::from_der(&block[..block.len() - 4]),
            Err(JarError::DerError(_))
        ));
    }
}
