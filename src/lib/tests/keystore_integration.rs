//! Trust stores loaded from disk, through configuration, against signed jars.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{JarOptions, TestSigner};
use jarverify::keystore::{
    load_trust_store, KeystoreDescriptor, KeystoreSource, KeystoreType, LoadPolicy,
    TrustStoreCache,
};
use jarverify::{JarVerifier, ResultCode, TrustStoreError, VerifierConfig};

fn signed_jar(dir: &Path, signer: &TestSigner) -> PathBuf {
    let path = dir.join("app.jar");
    common::write_signed_jar(
        &path,
        signer,
        &[("app/Main.class", b"main class bytes".as_slice())],
        JarOptions::default(),
    );
    path
}

fn verifier_for(source: KeystoreSource) -> JarVerifier {
    JarVerifier::new(Arc::new(TrustStoreCache::new(source)))
}

#[test]
fn test_jks_store_grants_trust() {
    let dir = tempfile::tempdir().unwrap();
    let signer = TestSigner::self_signed("JKS Signer");
    let other = TestSigner::self_signed("Unrelated");
    let jar = signed_jar(dir.path(), &signer);

    let store_path = dir.path().join("trusted.jks");
    std::fs::write(
        &store_path,
        common::jks(&[other.cert_der.as_slice(), signer.cert_der.as_slice()]),
    )
    .unwrap();

    let descriptor = KeystoreDescriptor::new(
        KeystoreType::Jks,
        format!("file://{}", store_path.display()),
    );
    let store = load_trust_store(&descriptor).unwrap();
    assert_eq!(store.len(), 2);
    assert!(store.contains(&signer.certificate()));

    let result = verifier_for(KeystoreSource::new(vec![descriptor])).verify(&jar);
    assert_eq!(result.code, ResultCode::SourceVerified);
}

#[test]
fn test_pem_store_grants_trust() {
    let dir = tempfile::tempdir().unwrap();
    let (signer, ca_der) = TestSigner::issued_by_new_ca("PEM Signer", "PEM Root");
    let jar = signed_jar(dir.path(), &signer);

    let store_path = dir.path().join("roots.pem");
    std::fs::write(&store_path, common::pem(&[ca_der.as_slice()])).unwrap();

    let descriptor = KeystoreDescriptor::new(KeystoreType::Pem, store_path.display().to_string());
    let result = verifier_for(KeystoreSource::new(vec![descriptor])).verify(&jar);
    assert_eq!(result.code, ResultCode::SourceVerified);
}

#[test]
fn test_missing_store_aborts_trust_phase() {
    let dir = tempfile::tempdir().unwrap();
    let signer = TestSigner::self_signed("Signer");
    let jar = signed_jar(dir.path(), &signer);

    let missing = KeystoreDescriptor::new(
        KeystoreType::Jks,
        dir.path().join("missing.jks").display().to_string(),
    );
    let mut verifier = verifier_for(KeystoreSource::new(vec![missing.clone()]));
    let result = verifier.verify(&jar);
    assert_eq!(result.code, ResultCode::UnknownError);
    let cause = result.cause.unwrap();
    assert_eq!(cause.kind, "truststore_unreadable");
    assert_eq!(cause.root().kind, "io");
    // The integrity phase completed before the stores failed.
    assert_eq!(verifier.certificate_entries().len(), 1);

    let skip = KeystoreSource::new(vec![missing]).with_policy(LoadPolicy::Skip);
    let result = verifier_for(skip).verify(&jar);
    assert_eq!(result.code, ResultCode::IntegrityVerified);
}

#[test]
fn test_unsupported_store_type() {
    let dir = tempfile::tempdir().unwrap();
    let signer = TestSigner::self_signed("Signer");
    let jar = signed_jar(dir.path(), &signer);

    let descriptor: KeystoreDescriptor = "PKCS11=/dev/token".parse().unwrap();
    assert!(matches!(
        load_trust_store(&descriptor),
        Err(TrustStoreError::UnsupportedType { .. })
    ));

    let result = verifier_for(KeystoreSource::new(vec![descriptor])).verify(&jar);
    assert_eq!(result.code, ResultCode::UnknownError);
    assert_eq!(result.cause.unwrap().kind, "truststore_unsupported_type");
}

#[test]
fn test_unsigned_jar_never_loads_stores() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("plain.jar");
    common::write_unsigned_jar(&jar, &[("a.txt", b"a".as_slice())]);

    let missing = KeystoreDescriptor::new(KeystoreType::Jks, "/nonexistent/store.jks");
    let cache = Arc::new(TrustStoreCache::new(KeystoreSource::new(vec![missing])));
    let result = JarVerifier::new(cache.clone()).verify(&jar);
    assert_eq!(result.code, ResultCode::NotSigned);
    assert!(!cache.is_loaded());
}

#[test]
fn test_config_refresh_picks_up_new_stores() {
    let dir = tempfile::tempdir().unwrap();
    let signer = TestSigner::self_signed("Refreshed Signer");
    let other = TestSigner::self_signed("Other");
    let jar = signed_jar(dir.path(), &signer);

    let store_path = dir.path().join("store.pem");
    std::fs::write(&store_path, common::pem(&[other.cert_der.as_slice()])).unwrap();

    let toml = format!(
        "[[keystores]]\ntype = \"PEM\"\nlocation = \"{}\"\n",
        store_path.display()
    );
    let cached_config = VerifierConfig::from_toml(&toml).unwrap();
    let mut refresh_config = cached_config.clone();
    refresh_config.trust.refresh = true;

    let mut cached = cached_config.build_verifier();
    let mut refreshing = refresh_config.build_verifier();
    assert_eq!(cached.verify(&jar).code, ResultCode::IntegrityVerified);
    assert_eq!(refreshing.verify(&jar).code, ResultCode::IntegrityVerified);

    std::fs::write(&store_path, common::pem(&[signer.cert_der.as_slice()])).unwrap();
    assert_eq!(cached.verify(&jar).code, ResultCode::IntegrityVerified);
    assert_eq!(refreshing.verify(&jar).code, ResultCode::SourceVerified);

    cached.trust_store_cache().invalidate().unwrap();
    assert_eq!(cached.verify(&jar).code, ResultCode::SourceVerified);
}

#[test]
fn test_keystore_list() {
    let dir = tempfile::tempdir().unwrap();
    let signer = TestSigner::self_signed("Listed Signer");
    let jar = signed_jar(dir.path(), &signer);

    let der_path = dir.path().join("signer.der");
    std::fs::write(&der_path, &signer.cert_der).unwrap();

    let mut config = VerifierConfig::default();
    config
        .add_keystores_from_list(&format!("DER={}", der_path.display()))
        .unwrap();
    let result = config.build_verifier().verify(&jar);
    assert_eq!(result.code, ResultCode::SourceVerified);
}
