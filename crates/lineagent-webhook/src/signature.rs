//! Webhook signature handling
//!
//! LINE signs each delivery with `base64(HMAC-SHA256(channel_secret, body))`
//! in the `X-Line-Signature` header. Verification runs over the exact bytes
//! received; the body is never re-serialized first.

use crate::{BridgeError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature header name (lowercase, as normalized by HTTP stacks)
pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Compute the base64 signature LINE would send for `body`
pub fn compute_signature(body: &[u8], channel_secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check `claimed_signature` against the raw body in constant time.
///
/// Fails closed: malformed base64 or a wrong digest length are rejections.
pub fn verify(raw_body: &[u8], claimed_signature: &str, channel_secret: &str) -> bool {
    let claimed = match STANDARD.decode(claimed_signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(raw_body);
    mac.verify_slice(&claimed).is_ok()
}

/// Verifier bound to one channel secret
#[derive(Clone)]
pub struct SignatureVerifier {
    channel_secret: SecretString,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("channel_secret", &"[REDACTED]")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(channel_secret: SecretString) -> Self {
        Self { channel_secret }
    }

    /// Verify a delivery; a missing header is a rejection
    pub fn check(&self, raw_body: &[u8], claimed_signature: Option<&str>) -> Result<()> {
        match claimed_signature.map(str::trim) {
            None | Some("") => Err(BridgeError::SignatureInvalid(format!(
                "missing {} header",
                SIGNATURE_HEADER
            ))),
            Some(signature) if verify(raw_body, signature, self.channel_secret.expose_secret()) => {
                Ok(())
            }
            Some(_) => Err(BridgeError::SignatureInvalid(
                "signature does not match body".to_string(),
            )),
        }
    }

    /// Sign a body with this verifier's secret
    pub fn sign(&self, body: &[u8]) -> String {
        compute_signature(body, self.channel_secret.expose_secret())
    }
}
