use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::internal::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the provider-style signature header value for a payload:
/// `sha256=<hex hmac>` over the raw request body.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    format!("sha256={}", hex_encode(&digest))
}

/// Verify an inbound `X-Hub-Signature-256` header against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let expected = sign_payload(secret, body);
    constant_time_eq(expected.as_bytes(), header_value.as_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_own_signature() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = sign_payload("topsecret", body);
        assert!(header.starts_with("sha256="));
        assert!(verify_signature("topsecret", body, &header));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload("topsecret", b"original");
        assert!(!verify_signature("topsecret", b"tampered", &header));
    }

    #[test]
    fn rejects_empty_secret() {
        let header = sign_payload("x", b"body");
        assert!(!verify_signature("", b"body", &header));
    }
}
