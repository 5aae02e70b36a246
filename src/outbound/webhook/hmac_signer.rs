use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Error type for payload signing
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Failed to serialise payload for signing: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A canonical request body together with its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Canonical JSON bytes; sent verbatim as the HTTP body.
    pub body: Vec<u8>,

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub signature: String,
}

/// HMAC-SHA256 signer for outbound webhook bodies.
///
/// Payloads are signed over their canonical encoding: compact JSON with the
/// keys of every object sorted lexicographically. Receivers in any language
/// can rebuild the same bytes, and because the body is sent in exactly that
/// form they can also verify the raw body without re-encoding it.
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    /// New HMAC signer with the given secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Canonicalize and sign a serializable payload.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<SignedPayload, SignatureError> {
        let body = canonical_json(payload)?;
        let signature = self.sign_bytes(&body);
        Ok(SignedPayload { body, signature })
    }

    /// Sign bytes that are already canonical.
    pub fn sign_bytes(&self, body: &[u8]) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
        };

        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a hex signature against a received body in constant time.
    pub fn verify(&self, body: &[u8], signature_hex: &str) -> bool {
        let expected = self.sign_bytes(body);
        expected.as_bytes().ct_eq(signature_hex.as_bytes()).into()
    }
}

/// Encode `payload` as compact JSON with recursively sorted object keys.
pub fn canonical_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, SignatureError> {
    let value = sort_keys(serde_json::to_value(payload)?);
    Ok(serde_json::to_vec(&value)?)
}

// Rebuilds maps in key order so the result does not depend on whether
// serde_json's `preserve_order` feature is enabled somewhere in the graph.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Helper function to format signature for HTTP header
pub fn format_signature_header(signature: &str) -> String {
    format!("sha256={signature}")
}

/// Helper function to parse signature from HTTP header
pub fn parse_signature_header(header: &str) -> Result<String, String> {
    if let Some(sig) = header.strip_prefix("sha256=") {
        Ok(sig.to_string())
    } else {
        Err(format!("Invalid signature header format: {header}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_is_deterministic() -> Result<(), SignatureError> {
        let signer = HmacSigner::new("test-secret");
        let payload = json!({"event": "payment.completed", "data": {"amount": 100}});

        let first = signer.sign(&payload)?;
        let second = signer.sign(&payload)?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_key_order_does_not_change_signature() -> Result<(), SignatureError> {
        let signer = HmacSigner::new("test-secret");
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[{"q":1,"p":2}]}}"#)?;
        let b: Value = serde_json::from_str(r#"{"a":{"x":[{"p":2,"q":1}],"y":2},"b":1}"#)?;

        assert_eq!(signer.sign(&a)?.signature, signer.sign(&b)?.signature);
        Ok(())
    }

    #[test]
    fn test_canonical_json_sorts_keys_and_is_compact() -> Result<(), SignatureError> {
        let body = canonical_json(&json!({"timestamp": "t", "event": "e", "data": {"z": 1, "a": 2}}))?;
        assert_eq!(
            String::from_utf8_lossy(&body),
            r#"{"data":{"a":2,"z":1},"event":"e","timestamp":"t"}"#
        );
        Ok(())
    }

    #[test]
    fn test_single_byte_change_changes_signature() {
        let signer = HmacSigner::new("test-secret");
        let original = br#"{"amount":100}"#;
        let modified = br#"{"amount":101}"#;

        let sig1 = signer.sign_bytes(original);
        let sig2 = signer.sign_bytes(modified);

        assert_ne!(sig1, sig2);
        let differing = sig1
            .chars()
            .zip(sig2.chars())
            .filter(|(a, b)| a != b)
            .count();
        assert!(differing > 16, "only {differing} hex digits changed");
    }

    #[test]
    fn test_different_secrets_different_signatures() {
        let body = b"payload";
        let sig1 = HmacSigner::new("secret1").sign_bytes(body);
        let sig2 = HmacSigner::new("secret2").sign_bytes(body);
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signer = HmacSigner::new("Jefe");
        assert_eq!(
            signer.sign_bytes(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_round_trip_and_rejection() -> Result<(), SignatureError> {
        let signer = HmacSigner::new("test-secret");
        let signed = signer.sign(&json!({"event": "user.created"}))?;

        assert!(signer.verify(&signed.body, &signed.signature));
        assert!(!signer.verify(b"{}", &signed.signature));
        assert!(!HmacSigner::new("rotated").verify(&signed.body, &signed.signature));
        assert!(!signer.verify(&signed.body, "not-hex"));
        Ok(())
    }

    #[test]
    fn test_signature_is_hex_encoded() {
        let signature = HmacSigner::new("test-secret").sign_bytes(b"test");

        // Should be valid hex (64 characters for SHA256)
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_format_signature_header() {
        let header = format_signature_header("abcdef123456");
        assert_eq!(header, "sha256=abcdef123456");
    }

    #[test]
    fn test_parse_signature_header() -> Result<(), String> {
        let signature = parse_signature_header("sha256=abcdef123456")?;
        assert_eq!(signature, "abcdef123456");
        Ok(())
    }

    #[test]
    fn test_parse_invalid_signature_header() {
        let result = parse_signature_header("md5=abcdef123456");
        assert!(result.is_err());
    }
}
