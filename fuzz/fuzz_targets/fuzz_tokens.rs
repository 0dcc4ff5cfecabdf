//! Fuzz testing for token parsing.
//!
//! Feeds arbitrary strings to the CSRF and session token parsers. Neither
//! may panic, and nothing that was not minted with the key may validate.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_tokens
//! cargo +nightly fuzz run fuzz_tokens -- -max_total_time=60
//! ```

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use skygate::csrf::{CsrfCodec, CsrfToken};
use skygate::session::SessionCodec;

const SECRET: &[u8] = b"fuzzing-secret-fuzzing-secret-0123456789";

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let csrf = CsrfCodec::new(SECRET, Duration::from_secs(3600), false).unwrap();
    let _ = CsrfToken::parse(raw);
    let _ = CsrfCodec::extract_payload(raw);
    assert!(!csrf.validate(raw));
    let _ = csrf.verify_submission(Some(raw), Some(raw));

    let sessions = SessionCodec::new(SECRET, Duration::from_secs(60)).unwrap();
    let _ = SessionCodec::token_id(raw);
    let _ = sessions.verify(raw);
});
