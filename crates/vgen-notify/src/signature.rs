//! HMAC-SHA256 body signatures.
//!
//! Header format: `sha256=<base64url(hmac)>`. The same helpers sign outbound
//! notifications and verify inbound webhooks.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{NotifyError, NotifyResult};

type HmacSha256 = Hmac<Sha256>;

/// Signature of the request body.
pub const SIGNATURE_HEADER: &str = "x-vgen-signature";

/// Unique id of one notification, stable across retries.
pub const DELIVERY_HEADER: &str = "x-vgen-delivery";

/// Notification event name.
pub const EVENT_HEADER: &str = "x-vgen-event";

const PREFIX: &str = "sha256=";

/// Sign `body` with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> NotifyResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::config(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(format!("{}{}", PREFIX, URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())))
}

/// Check a signature header value against `body`. Constant-time compare.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(encoded) = header_value.trim().strip_prefix(PREFIX) else {
        return false;
    };
    let Ok(expected) = URL_SAFE_NO_PAD.decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let sig = sign("s3cret", b"{\"a\":1}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert!(verify("s3cret", b"{\"a\":1}", &sig));
    }

    #[test]
    fn test_wrong_secret_or_body() {
        let sig = sign("s3cret", b"body").unwrap();
        assert!(!verify("other", b"body", &sig));
        assert!(!verify("s3cret", b"body2", &sig));
    }

    #[test]
    fn test_malformed_header() {
        assert!(!verify("s3cret", b"body", "md5=abc"));
        assert!(!verify("s3cret", b"body", "sha256=***"));
        assert!(!verify("s3cret", b"body", ""));
    }
}
