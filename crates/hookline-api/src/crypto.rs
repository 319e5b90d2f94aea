//! HMAC signature verification for the intake path.
//!
//! Producers sign the raw request body with HMAC-SHA256 and send the hex
//! digest in `X-Signature`. Verification recomputes the digest and compares
//! in constant time.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Invalid secret key.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSecret => write!(f, "invalid secret key"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Generates the HMAC-SHA256 of `payload` as a lowercase hex string.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the key is rejected by the
/// MAC implementation.
pub fn generate_hmac_hex(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a producer signature against the raw body.
///
/// The comparison is constant time so the expected digest cannot be probed
/// through timing analysis. An unusable secret verifies as false.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    match generate_hmac_hex(payload, secret) {
        Ok(expected) => timing_safe_eq(signature, &expected),
        Err(_) => false,
    }
}

/// Constant-time string comparison.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}
