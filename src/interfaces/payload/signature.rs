use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Separates the signed prefix from the signature in compact payloads.
pub const SIGN_MARKER: &str = "_sign<";

/// Splits `raw` at the last signature marker.
///
/// Returns the unsigned prefix and the signature text with the closing `>` and any
/// `=` padding removed, or `None` when the payload carries no signature.
pub fn split_signed(raw: &str) -> Option<(&str, &str)> {
    let at = raw.rfind(SIGN_MARKER)?;
    let prefix = &raw[..at];
    let rest = &raw[at + SIGN_MARKER.len()..];
    let signature = rest.strip_suffix('>').unwrap_or(rest);
    Some((prefix, signature.trim_end_matches('=')))
}

fn mac(secret: &[u8], message: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    mac
}

/// HMAC-SHA256 of `message`, base64url without padding.
pub fn sign(message: &str, secret: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(mac(secret, message).finalize().into_bytes())
}

/// Constant-time check of a base64url signature over `message`.
pub fn verify(message: &str, signature: &str, secret: &[u8]) -> bool {
    let Ok(provided) = URL_SAFE_NO_PAD.decode(signature.trim_end_matches('=').as_bytes()) else {
        return false;
    };
    mac(secret, message).verify_slice(&provided).is_ok()
}

/// Lower-case hex SHA-256.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}
