//! Secret types for room credentials.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps user
//! signatures and private-map keys the same way. `SecretString` implements
//! `Debug` with redaction, so a struct deriving `Debug` that carries a
//! credential can be logged through `tracing` without leaking it.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credential {
//!     user_id: String,
//!     user_sig: SecretString,
//! }
//!
//! let cred = Credential {
//!     user_id: "alice".to_string(),
//!     user_sig: SecretString::from("eJyrVkrxCdYrSy1SslIy"),
//! };
//!
//! assert!(!format!("{cred:?}").contains("eJyr"));
//! assert_eq!(cred.user_sig.expose_secret(), "eJyrVkrxCdYrSy1SslIy");
//! ```
//!
//! Use `SecretString` for user signatures and private-map keys. Reach for
//! `expose_secret()` only at the point the value is handed to the media
//! engine.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("user-sig-value");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("user-sig-value"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("private-map-key");
        assert_eq!(secret.expose_secret(), "private-map-key");
    }

    #[test]
    fn test_deserialize_credential() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct RoomCredential {
            user_id: String,
            user_sig: SecretString,
        }

        let json = r#"{"user_id": "bob", "user_sig": "sig-123"}"#;
        let cred: RoomCredential = serde_json::from_str(json).unwrap();

        assert_eq!(cred.user_sig.expose_secret(), "sig-123");
        let debug_str = format!("{cred:?}");
        assert!(debug_str.contains("bob"));
        assert!(!debug_str.contains("sig-123"));
    }
}
