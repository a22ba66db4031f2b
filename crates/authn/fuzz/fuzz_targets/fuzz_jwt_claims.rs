//! Structured fuzz target for JWT parsing.
//!
//! Uses the `arbitrary` crate to generate structured JWT-like inputs,
//! constructs base64-encoded JWT strings from them, and feeds them through
//! the pre-verification pipeline. This reaches deeper code paths than raw
//! byte fuzzing because the inputs are valid-ish JWTs with plausible
//! structure.

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};
use tollgate_authn::{AlgorithmPolicy, AuthError, jwt::parse_unverified, validation::validate_kid};

/// Structured input representing a fuzzed JWT.
#[derive(Debug, Arbitrary)]
struct FuzzedJwt {
    alg: FuzzedAlg,
    kid: Option<String>,
    iss: String,
    sub: String,
    aud: FuzzedAudience,
    exp: Option<i64>,
    nbf: Option<f64>,
    scope: String,
    signature_bytes: Vec<u8>,
    include_typ: bool,
}

/// Algorithm values covering known attack vectors and edge cases.
#[derive(Debug, Arbitrary)]
enum FuzzedAlg {
    RS256,
    ES256,
    EdDSA,
    /// `none` in arbitrary casing
    None(bool),
    HS256,
    HS512,
    PS512,
    Other(String),
}

impl FuzzedAlg {
    fn as_str(&self) -> &str {
        match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::EdDSA => "EdDSA",
            Self::None(false) => "none",
            Self::None(true) => "NONE",
            Self::HS256 => "HS256",
            Self::HS512 => "HS512",
            Self::PS512 => "PS512",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzedAudience {
    Single(String),
    Many(Vec<String>),
    Number(i64),
}

fn build_jwt(input: &FuzzedJwt) -> String {
    let mut header = Map::new();
    header.insert("alg".into(), json!(input.alg.as_str()));
    if input.include_typ {
        header.insert("typ".into(), json!("JWT"));
    }
    if let Some(ref kid) = input.kid {
        header.insert("kid".into(), json!(kid));
    }

    let mut payload = Map::new();
    payload.insert("iss".into(), json!(input.iss));
    payload.insert("sub".into(), json!(input.sub));
    payload.insert(
        "aud".into(),
        match &input.aud {
            FuzzedAudience::Single(aud) => json!(aud),
            FuzzedAudience::Many(auds) => json!(auds),
            FuzzedAudience::Number(n) => json!(n),
        },
    );
    if let Some(exp) = input.exp {
        payload.insert("exp".into(), json!(exp));
    }
    if let Some(nbf) = input.nbf {
        payload.insert("nbf".into(), json!(nbf));
    }
    payload.insert("scope".into(), json!(input.scope));

    let header_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(header)).unwrap_or_default());
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(payload)).unwrap_or_default());
    let sig_b64 = URL_SAFE_NO_PAD.encode(&input.signature_bytes);

    format!("{header_b64}.{payload_b64}.{sig_b64}")
}

fuzz_target!(|input: FuzzedJwt| {
    let token = build_jwt(&input);

    let Ok(parsed) = parse_unverified(&token) else {
        return;
    };

    // Forbidden algorithms must never pass the allow-list, whatever the casing
    let result = AlgorithmPolicy::default().check(&parsed.header.alg);
    if matches!(input.alg, FuzzedAlg::None(_) | FuzzedAlg::HS256 | FuzzedAlg::HS512) {
        assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm { .. })));
    }

    if let Some(ref kid) = parsed.header.kid {
        let _ = validate_kid(kid);
    }
});
