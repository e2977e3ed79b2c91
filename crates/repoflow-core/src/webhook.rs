//! `X-Hub-Signature-256` verification for webhook deliveries.
//!
//! A delivery whose signature checks out may be dispatched as
//! [`SenderVerification::Verified`](crate::envelope::SenderVerification).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature is missing the sha256= prefix")]
    MissingPrefix,

    #[error("signature is not valid hex")]
    Malformed,

    #[error("signature mismatch")]
    Mismatch,

    #[error("webhook secret is not a usable HMAC key")]
    InvalidKey,
}

fn mac(secret: &[u8], body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(mac)
}

/// Header value for `body` signed with `secret`, e.g. `sha256=5d61...`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let digest = mac(secret, body)?.finalize().into_bytes();
    Ok(format!("{PREFIX}{}", hex::encode(digest)))
}

/// Check a `sha256=<hex>` header against `body`. Comparison is constant-time.
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> Result<(), SignatureError> {
    let hex_digest = header
        .trim()
        .strip_prefix(PREFIX)
        .ok_or(SignatureError::MissingPrefix)?;
    let expected = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed)?;
    mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Example from GitHub's webhook validation docs.
    const SECRET: &[u8] = b"It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";
    const SIGNATURE: &str =
        "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";

    #[test]
    fn test_sign_matches_known_vector() {
        assert_eq!(sign(SECRET, BODY).unwrap(), SIGNATURE);
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        assert_eq!(verify_signature(SECRET, BODY, SIGNATURE), Ok(()));
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        assert_eq!(
            verify_signature(SECRET, b"Hello, World?", SIGNATURE),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_verify_rejects_bad_headers() {
        assert_eq!(
            verify_signature(SECRET, BODY, "757107ea"),
            Err(SignatureError::MissingPrefix)
        );
        assert_eq!(
            verify_signature(SECRET, BODY, "sha256=not-hex"),
            Err(SignatureError::Malformed)
        );
    }
}
