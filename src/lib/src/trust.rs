//! Trust matching: is any signer certificate present in a trust store?
//!
//! This is an allow-list check by certificate identity. A certificate
//! anywhere in any chain that is byte-identical to one held by any store is
//! enough. Validity periods, revocation and issuer signatures are not
//! examined; a store containing an expired certificate still grants trust.

use crate::keystore::TrustStore;
use crate::signature::{Certificate, CertificateChain, CertificateEntries};

/// Which certificate of which chain matched which store.
#[derive(Debug, Clone, Copy)]
pub struct TrustMatch<'a> {
    pub chain: &'a CertificateChain,
    pub certificate: &'a Certificate,
    pub store: &'a TrustStore,
}

/// First match over chains × certificates × stores, in that nesting order.
pub fn find_trusted<'a>(
    entries: &'a CertificateEntries,
    stores: &'a [TrustStore],
) -> Option<TrustMatch<'a>> {
    if stores.iter().all(TrustStore::is_empty) {
        return None;
    }
    for chain in entries.iter() {
        for certificate in chain {
            for store in stores {
                if store.contains(certificate) {
                    return Some(TrustMatch {
                        chain,
                        certificate,
                        store,
                    });
                }
            }
        }
    }
    None
}

pub fn is_trusted(entries: &CertificateEntries, stores: &[TrustStore]) -> bool {
    find_trusted(entries, stores).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeystoreType;

    fn cert(name: &str) -> Certificate {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        Certificate::from_der(certified.cert.der()).unwrap()
    }

    #[test]
    fn test_no_stores() {
        let entries: CertificateEntries =
            std::iter::once(CertificateChain::new(vec![cert("a.example")])).collect();
        assert!(!is_trusted(&entries, &[]));
        let empty = TrustStore::new("empty", KeystoreType::Pem, Vec::new());
        assert!(!is_trusted(&entries, &[empty]));
    }

    #[test]
    fn test_match_anywhere_in_chain() {
        let leaf = cert("leaf.example");
        let root = cert("root.example");
        let other = cert("other.example");
        let entries: CertificateEntries =
            std::iter::once(CertificateChain::new(vec![leaf, root.clone()])).collect();

        let unrelated = TrustStore::new("unrelated", KeystoreType::Pem, vec![other]);
        let trusted = TrustStore::new("trusted", KeystoreType::Pem, vec![root.clone()]);
        assert!(!is_trusted(&entries, std::slice::from_ref(&unrelated)));

        let stores = [unrelated, trusted];
        let found = find_trusted(&entries, &stores).unwrap();
        assert_eq!(found.certificate, &root);
        assert_eq!(found.store.name(), "trusted");
    }

    #[test]
    fn test_empty_entries() {
        let store = TrustStore::new("s", KeystoreType::Pem, vec![cert("x.example")]);
        assert!(!is_trusted(&CertificateEntries::new(), &[store]));
    }
}
