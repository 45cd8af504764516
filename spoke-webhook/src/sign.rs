use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the delivery body under the subscriber's secret,
/// lowercase hex encoded. Receivers verify by recomputing over the raw
/// request body.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_lowercase_hex() {
        let signature = sign_payload("topsecret", b"{\"id\":\"1\"}");
        assert_eq!(signature.len(), 64);
        assert_eq!(signature, signature.to_lowercase());
        assert_eq!(signature, sign_payload("topsecret", b"{\"id\":\"1\"}"));
    }

    #[test]
    fn signature_depends_on_secret_and_body() {
        let base = sign_payload("secret-a", b"payload");
        assert_ne!(base, sign_payload("secret-b", b"payload"));
        assert_ne!(base, sign_payload("secret-a", b"payload2"));
    }
}
