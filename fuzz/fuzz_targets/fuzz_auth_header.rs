//! Fuzz testing for `Authorization` header handling.
//!
//! Feeds arbitrary header values through bearer extraction and token
//! validation. Neither step may panic, and nothing an attacker can type
//! without the secret may validate.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_auth_header
//! cargo +nightly fuzz run fuzz_auth_header -- -max_total_time=60
//! ```

#![no_main]

use std::sync::OnceLock;

use edge_gateway::auth::{SigningKey, TokenValidator};
use edge_gateway::middleware::{BearerCredential, extract_bearer};
use libfuzzer_sys::fuzz_target;

fn validator() -> &'static TokenValidator {
    static VALIDATOR: OnceLock<TokenValidator> = OnceLock::new();
    VALIDATOR.get_or_init(|| {
        let key = SigningKey::from_secret("fuzzing-secret-fuzzing-secret-fuzzing-secret")
            .expect("secret is long enough");
        TokenValidator::new(key)
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(header) = std::str::from_utf8(data) else {
        return;
    };

    match extract_bearer(Some(header)) {
        BearerCredential::Present(token) => {
            assert!(header.starts_with("Bearer "));
            assert!(
                validator().validate(token).is_err(),
                "forged token accepted: {token:?}"
            );
        }
        BearerCredential::Missing => {
            assert!(!header.starts_with("Bearer "));
        }
    }
});
