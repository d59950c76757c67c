//! Fuzz target for manifest and signature file parsing
//!
//! Security concerns:
//! - Panics on malformed line endings or continuation lines
//! - Section offsets that do not line up with the input
//! - Quadratic behaviour on many empty sections

#![no_main]

use libfuzzer_sys::fuzz_target;

use jarverify::archive::{Manifest, SignatureFile};

fuzz_target!(|data: &[u8]| {
    if let Ok(manifest) = Manifest::parse(data.to_vec()) {
        // Raw section bytes must be slices of the input.
        let total: usize = manifest.sections().iter().map(|s| s.raw().len()).sum();
        assert!(total + manifest.main_attributes().raw().len() <= data.len());

        for section in manifest.sections() {
            let _ = section.digest_attributes("-Digest");
        }

        // Use the same bytes as a signature file over itself.
        if let Ok(sf) = SignatureFile::parse("META-INF/FUZZ.SF", data.to_vec()) {
            let _ = sf.signed_names(&manifest);
        }
    }
});
