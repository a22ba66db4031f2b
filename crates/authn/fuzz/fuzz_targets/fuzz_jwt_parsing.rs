//! Fuzz target for unverified JWT parsing.
//!
//! Feeds arbitrary byte strings as JWT tokens to the pre-verification checks.
//! Every result must be either `Ok(...)` or `Err(AuthError)`; no input may
//! panic or hang.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tollgate_authn::{
    AlgorithmPolicy,
    jwt::parse_unverified,
    validation::validate_kid,
};

fuzz_target!(|data: &[u8]| {
    // Only process valid UTF-8; bearer tokens are always UTF-8 strings
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(parsed) = parse_unverified(token) else {
        return;
    };

    // The header algorithm goes through the allow-list exactly as the validator does
    let _ = AlgorithmPolicy::default().check(&parsed.header.alg);

    if let Some(ref kid) = parsed.header.kid {
        let _ = validate_kid(kid);
    }
});
