//! Fuzz target for keystore parsing
//!
//! Security concerns:
//! - Huge entry counts or length fields causing excessive allocation
//! - Truncated entries
//! - Malformed certificates inside otherwise valid stores

#![no_main]

use libfuzzer_sys::fuzz_target;

use jarverify::keystore::{jks, parse_keystore, KeystoreType};

fuzz_target!(|data: &[u8]| {
    let _ = jks::parse(data, "fuzz.jks");
    let _ = parse_keystore(&KeystoreType::Pem, data, "fuzz.pem");
    let _ = parse_keystore(&KeystoreType::Der, data, "fuzz.der");
});
