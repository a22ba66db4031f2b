//! Fuzz target for `Authorization` header extraction and route resolution.
//!
//! Both run on every request before any token check, so they must accept
//! arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tollgate_authn::{RoutePolicy, extract_bearer};

fuzz_target!(|data: (&str, &str)| {
    let (header, route) = data;

    if let Some(token) = extract_bearer(header) {
        assert!(!token.is_empty());
        assert!(!token.contains(char::is_whitespace));
    }

    let policy = RoutePolicy::builder()
        .anonymous("/health")
        .anonymous("/docs/{*rest}")
        .protected("/docs/admin")
        .build();
    if let Ok(policy) = policy {
        let _ = policy.resolve(route);
    }
});
