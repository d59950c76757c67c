//! Fuzz target for PKCS#7 signature block parsing
//!
//! Security concerns:
//! - DER length fields pointing past the end of the input
//! - Deeply nested or indefinite-length encodings
//! - Malformed embedded certificates
//! - Signer infos with truncated signed attributes

#![no_main]

use libfuzzer_sys::fuzz_target;

use jarverify::signature::{verify_block, SignedData};

fuzz_target!(|data: &[u8]| {
    if let Ok(signed_data) = SignedData::from_der(data) {
        for signer in &signed_data.signers {
            let _ = signer.message_digest();
            let _ = signed_data.signer_certificate(signer);
        }
    }

    // Full verification path against a fixed signature file.
    let _ = verify_block("META-INF/FUZZ.RSA", data, b"Signature-Version: 1.0\r\n\r\n");
});
