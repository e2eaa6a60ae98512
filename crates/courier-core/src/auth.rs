//! HMAC-SHA256 request and subscription signing.
//!
//! Two schemes share the same keyed digest:
//!
//! - REST requests sign `UPPER(method)\npath\ncanonicalQuery`, where the
//!   canonical query lowercases keys, sorts them, and joins `key=value`
//!   pairs with `&` using the values exactly as received. The
//!   `auth_signature` parameter itself is excluded before canonicalization.
//! - Channel subscriptions sign `socket_id:channel` with an optional
//!   `:channel_data` suffix, and present the result as
//!   `<app_id>:<hex digest>`.
//!
//! Verification only ever answers true or false; mapping a failure to an
//! access-denied outcome is the caller's job.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the signature itself.
const AUTH_SIGNATURE_PARAM: &str = "auth_signature";

fn keyed(secret: &str) -> HmacSha256 {
    // HMAC-SHA256 accepts keys of any length
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key")
}

fn hex_digest(secret: &str, message: &str) -> String {
    let mut mac = keyed(secret);
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_digest(secret: &str, message: &str, candidate: &str) -> bool {
    let Ok(raw) = hex::decode(candidate) else {
        return false;
    };
    let mut mac = keyed(secret);
    mac.update(message.as_bytes());
    mac.verify_slice(&raw).is_ok()
}

/// Build the canonical query string covered by a request signature.
///
/// Keys are lowercased then sorted lexicographically; values are joined in
/// raw, as received. `auth_signature` is excluded. This deliberately skips
/// URL escaping, which the protocol mandates for interoperability.
#[must_use]
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, &str)> = params
        .iter()
        .filter(|(key, _)| !key.eq_ignore_ascii_case(AUTH_SIGNATURE_PARAM))
        .map(|(key, value)| (key.to_lowercase(), value.as_str()))
        .collect();

    pairs.sort();

    let pieces: Vec<String> = pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    pieces.join("&")
}

fn request_string(method: &str, path: &str, params: &[(String, String)]) -> String {
    format!(
        "{}\n{}\n{}",
        method.to_uppercase(),
        path,
        canonical_query(params)
    )
}

/// Sign a REST request.
#[must_use]
pub fn sign_request(method: &str, path: &str, params: &[(String, String)], secret: &str) -> String {
    hex_digest(secret, &request_string(method, path, params))
}

/// Verify a REST request signature.
#[must_use]
pub fn verify_request(
    candidate: &str,
    method: &str,
    path: &str,
    params: &[(String, String)],
    secret: &str,
) -> bool {
    verify_digest(secret, &request_string(method, path, params), candidate)
}

fn subscription_string(socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{}:{}:{}", socket_id, channel, data),
        None => format!("{}:{}", socket_id, channel),
    }
}

/// Sign a private or presence channel subscription.
#[must_use]
pub fn sign_subscription(
    app_id: &str,
    secret: &str,
    socket_id: &str,
    channel: &str,
    channel_data: Option<&str>,
) -> String {
    let digest = hex_digest(secret, &subscription_string(socket_id, channel, channel_data));
    format!("{}:{}", app_id, digest)
}

/// Verify a subscription auth string of the form `<app_id>:<hex digest>`.
#[must_use]
pub fn verify_subscription(
    auth: &str,
    app_id: &str,
    secret: &str,
    socket_id: &str,
    channel: &str,
    channel_data: Option<&str>,
) -> bool {
    let Some((key, digest)) = auth.split_once(':') else {
        return false;
    };
    if key != app_id {
        return false;
    }
    verify_digest(
        secret,
        &subscription_string(socket_id, channel, channel_data),
        digest,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_query_lowercases_and_sorts() {
        let q = params(&[
            ("Name", "Something else"),
            ("auth_key", "foo"),
        ]);
        // Values stay raw, unescaped
        assert_eq!(canonical_query(&q), "auth_key=foo&name=Something else");
    }

    #[test]
    fn test_canonical_query_excludes_signature() {
        let q = params(&[("auth_key", "foo"), ("auth_signature", "deadbeef")]);
        assert_eq!(canonical_query(&q), "auth_key=foo");
    }

    #[test]
    fn test_sign_is_deterministic() {
        let q = params(&[("auth_key", "k"), ("auth_timestamp", "1353088179")]);
        let a = sign_request("POST", "/apps/3/events", &q, "secret");
        let b = sign_request("POST", "/apps/3/events", &q, "secret");
        assert_eq!(a, b);
        assert!(verify_request(&a, "post", "/apps/3/events", &q, "secret"));
    }

    #[test]
    fn test_verify_flips_on_any_component() {
        let q = params(&[("auth_key", "k"), ("mode", "fast")]);
        let sig = sign_request("GET", "/apps/3/channels", &q, "secret");

        assert!(verify_request(&sig, "GET", "/apps/3/channels", &q, "secret"));
        assert!(!verify_request(&sig, "POST", "/apps/3/channels", &q, "secret"));
        assert!(!verify_request(&sig, "GET", "/apps/4/channels", &q, "secret"));
        assert!(!verify_request(&sig, "GET", "/apps/3/channels", &q, "other"));

        let changed = params(&[("auth_key", "k"), ("mode", "slow")]);
        assert!(!verify_request(&sig, "GET", "/apps/3/channels", &changed, "secret"));
    }

    #[test]
    fn test_verify_rejects_non_hex() {
        let q = params(&[]);
        assert!(!verify_request("not hex!", "GET", "/", &q, "secret"));
    }

    #[test]
    fn test_subscription_roundtrip() {
        let auth = sign_subscription("app3", "secret", "1234.5678", "private-room", None);
        assert!(auth.starts_with("app3:"));
        assert!(verify_subscription(
            &auth,
            "app3",
            "secret",
            "1234.5678",
            "private-room",
            None
        ));
        // Wrong socket, channel, key or data all fail
        assert!(!verify_subscription(&auth, "app3", "secret", "1.2", "private-room", None));
        assert!(!verify_subscription(&auth, "app3", "secret", "1234.5678", "private-x", None));
        assert!(!verify_subscription(&auth, "other", "secret", "1234.5678", "private-room", None));
        assert!(!verify_subscription(
            &auth,
            "app3",
            "secret",
            "1234.5678",
            "private-room",
            Some("{\"user_id\":\"1\"}")
        ));
    }

    #[test]
    fn test_subscription_with_channel_data() {
        let data = r#"{"user_id":"7","user_info":{"name":"Bob"}}"#;
        let auth =
            sign_subscription("app3", "secret", "9.9", "presence-lobby", Some(data));
        assert!(verify_subscription(
            &auth,
            "app3",
            "secret",
            "9.9",
            "presence-lobby",
            Some(data)
        ));
    }

    #[test]
    fn test_malformed_auth_string() {
        assert!(!verify_subscription("nodelimiter", "a", "s", "1.1", "private-x", None));
    }
}
