//! Performance benchmarks for the token verification hot path.
//!
//! Every authenticated request goes through claim decoding and signature
//! verification, so these should stay in the microsecond range.
//!
//! Run with: `cargo bench -p octofhir-oidc`

use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use octofhir_oidc::claims::Claims;
use octofhir_oidc::jwks::GivenKeys;
use octofhir_oidc::token::{ParserOptions, TokenParser, decode_unverified, is_refresh_need};
use serde_json::json;
use time::OffsetDateTime;

const SECRET: &[u8] = b"benchmark-hmac-secret-0123456789abcdef";

fn payload() -> serde_json::Value {
    json!({
        "sub": "user-123",
        "iss": "https://sso.example.com/realms/main",
        "exp": OffsetDateTime::now_utc().unix_timestamp() + 3600,
        "scope": "openid profile orders:read orders:write",
        "realm_access": { "roles": ["viewer", "editor", "admin"] },
        "resource_access": { "orders": { "roles": ["reader"] } },
    })
}

fn signed_token() -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("svc".to_string());
    encode(&header, &payload(), &EncodingKey::from_secret(SECRET)).unwrap()
}

/// Benchmark: Claim extraction from a raw payload.
fn bench_claims_from_json(c: &mut Criterion) {
    let raw = serde_json::to_vec(&payload()).unwrap();

    c.bench_function("claims_from_json", |b| {
        b.iter(|| black_box(Claims::from_json(&raw)));
    });
}

/// Benchmark: Payload decoding without a signature check.
///
/// This is what the refresh lookahead runs on every browser request.
fn bench_decode_unverified(c: &mut Criterion) {
    let token = signed_token();
    let now = OffsetDateTime::now_utc().unix_timestamp();

    c.bench_function("decode_unverified", |b| {
        b.iter(|| black_box(decode_unverified(&token)));
    });

    c.bench_function("is_refresh_need", |b| {
        b.iter(|| black_box(is_refresh_need(&token, now, Duration::from_secs(60))));
    });
}

/// Benchmark: Full signature verification against a given HMAC key.
fn bench_signature_parse(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let keys = GivenKeys::new().with_hmac("svc", SECRET, Algorithm::HS256);
    let parser = TokenParser::signature(
        Arc::new(keys),
        &ParserOptions::new().with_algorithms(vec![Algorithm::HS256]),
    );
    let token = signed_token();

    c.bench_function("signature_parse_hs256", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(parser.parse(&token).await) });
    });
}

criterion_group!(
    benches,
    bench_claims_from_json,
    bench_decode_unverified,
    bench_signature_parse,
);
criterion_main!(benches);
