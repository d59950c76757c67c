//! Verifier configuration.
//!
//! ```toml
//! [[keystores]]
//! type = "JKS"
//! location = "file:///etc/jarverify/trusted.jks"
//!
//! [[keystores]]
//! type = "PEM"
//! location = "/etc/ssl/vendor.pem"
//!
//! [trust]
//! refresh = false
//! on_store_error = "abort"   # or "skip"
//! ```
//!
//! `JARVERIFY_KEYSTORES="TYPE=LOCATION,TYPE=LOCATION"` appends further
//! stores at run time.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::*;
use crate::keystore::{
    KeystoreDescriptor, KeystoreSource, KeystoreType, LoadPolicy, TrustStoreCache,
};
use crate::verifier::JarVerifier;

pub const KEYSTORES_ENV: &str = "JARVERIFY_KEYSTORES";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeystoreConfig {
    #[serde(rename = "type")]
    pub store_type: String,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    /// Reload trust stores before every verification.
    pub refresh: bool,
    pub on_store_error: LoadPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    pub keystores: Vec<KeystoreConfig>,
    pub trust: TrustConfig,
}

impl VerifierConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, JarError> {
        toml::from_str(toml_str).map_err(|e| JarError::ConfigError(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, JarError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| JarError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Append stores listed as comma-separated `TYPE=LOCATION` pairs.
    pub fn add_keystores_from_list(&mut self, list: &str) -> Result<(), JarError> {
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let descriptor: KeystoreDescriptor = item.parse()?;
            self.keystores.push(KeystoreConfig {
                store_type: descriptor.store_type.to_string(),
                location: descriptor.location,
            });
        }
        Ok(())
    }

    /// Apply `JARVERIFY_KEYSTORES` if it is set.
    pub fn apply_env(&mut self) -> Result<(), JarError> {
        match std::env::var(KEYSTORES_ENV) {
            Ok(list) => self.add_keystores_from_list(&list),
            Err(std::env::VarError::NotPresent) => Ok(()),
            Err(e) => Err(JarError::ConfigError(format!("{}: {}", KEYSTORES_ENV, e))),
        }
    }

    pub fn descriptors(&self) -> Vec<KeystoreDescriptor> {
        self.keystores
            .iter()
            .map(|k| KeystoreDescriptor::new(KeystoreType::parse(&k.store_type), &k.location))
            .collect()
    }

    pub fn keystore_source(&self) -> KeystoreSource {
        KeystoreSource::new(self.descriptors()).with_policy(self.trust.on_store_error)
    }

    /// A verifier with its own trust store cache over the configured stores.
    pub fn build_verifier(&self) -> JarVerifier {
        let cache = Arc::new(TrustStoreCache::new(self.keystore_source()));
        let mut verifier = JarVerifier::new(cache);
        verifier.set_refresh_trust_stores(self.trust.refresh);
        verifier
    }
}
