use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 of `body` keyed by `secret`.
pub fn hmac_sha256(secret: &[u8], body: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Lowercase hex HMAC-SHA256 signature, the form providers send in webhook headers.
pub fn sign_hex(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    Ok(hex::encode(hmac_sha256(secret.as_bytes(), body)?))
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Decode a header signature: optional `sha256=` prefix, then hex or base64.
fn decode_signature(header: &str) -> Option<Vec<u8>> {
    let trimmed = header.trim();
    let raw = trimmed
        .strip_prefix("sha256=")
        .or_else(|| trimmed.strip_prefix("SHA256="))
        .unwrap_or(trimmed)
        .trim();
    if raw.is_empty() {
        return None;
    }

    if raw.len() % 2 == 0 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(raw) {
            return Some(bytes);
        }
    }
    BASE64.decode(raw).ok()
}

/// Verify a webhook body signature using constant-time comparison.
///
/// Accepts hex in any case or base64, with or without a `sha256=` prefix.
pub fn verify_body_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(provided) = decode_signature(header) else {
        return false;
    };
    let Ok(expected) = hmac_sha256(secret.as_bytes(), body) else {
        return false;
    };

    if expected.len() != provided.len() {
        return false;
    }

    expected.ct_eq(&provided).into()
}
