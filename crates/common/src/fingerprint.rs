use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SECRET_ENV: &str = "BGTASK_SECRET";
pub const DEFAULT_SECRET: &str = "change-me-in-production";

/// Shared application secret. Only ever read; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AppSecret(Arc<str>);

impl AppSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::from(secret.into()))
    }

    /// Reads `BGTASK_SECRET`, falling back to the development default.
    pub fn from_env() -> Self {
        Self::resolve(None)
    }

    /// Uses an explicit secret when given, the environment otherwise.
    pub fn resolve(explicit: Option<String>) -> Self {
        let secret = explicit
            .or_else(|| std::env::var(SECRET_ENV).ok())
            .unwrap_or_else(|| DEFAULT_SECRET.to_string());
        if secret == DEFAULT_SECRET {
            warn!("Using default secret - change {SECRET_ENV} in production!");
        }
        Self::new(secret)
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppSecret(<redacted>)")
    }
}

fn mac(secret: &AppSecret, encoded: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(encoded.as_bytes());
    mac
}

/// HMAC-SHA256 of the encoded envelope, lowercase hex.
pub fn fingerprint(encoded: &str, secret: &AppSecret) -> String {
    hex::encode(mac(secret, encoded).finalize().into_bytes())
}

/// Constant-time check of `tag`; a tag that is not hex never verifies.
pub fn verify(encoded: &str, tag: &str, secret: &AppSecret) -> bool {
    let Ok(provided) = hex::decode(tag.trim()) else {
        return false;
    };
    mac(secret, encoded).verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let secret = AppSecret::new("Jefe");
        assert_eq!(
            fingerprint("what do ya want for nothing?", &secret),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verifies_own_tag_only() {
        let secret = AppSecret::new("s3cret");
        let encoded = "eyJ0YXNrIjpudWxsfQ==";
        let tag = fingerprint(encoded, &secret);
        assert_eq!(tag.len(), 64);
        assert!(verify(encoded, &tag, &secret));

        let mut flipped = tag.clone().into_bytes();
        flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
        assert!(!verify(encoded, std::str::from_utf8(&flipped).unwrap(), &secret));
        assert!(!verify(encoded, &tag, &AppSecret::new("other")));
        assert!(!verify("eyJ0YXNrIjoxfQ==", &tag, &secret));
        assert!(!verify(encoded, "not-hex", &secret));
        assert!(!verify(encoded, "", &secret));
    }

    #[test]
    fn debug_is_redacted() {
        let secret = AppSecret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(
            AppSecret::resolve(Some("explicit".into())),
            AppSecret::new("explicit")
        );
    }
}
