/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::Result;

/// Bearer token issued by the dashboard's authentication service.
///
/// The token is opaque to this crate. It is presented on the WebSocket upgrade request as an
/// `Authorization: Bearer <token>` header and is never written to logs: the [`Debug`] output
/// is redacted by [`SecretString`].
#[derive(Clone, Debug)]
pub struct Credential {
    token: SecretString,
}

impl Credential {
    #[must_use]
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    /// Returns the token.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Builds the `Authorization` header value, flagged as sensitive so that HTTP tooling
    /// does not print it.
    pub(crate) fn bearer_header(&self) -> Result<HeaderValue> {
        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let credential = Credential::new("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        let debug = format!("{credential:?}");

        assert!(!debug.contains("eyJhbGciOiJIUzI1NiJ9"));
    }

    #[test]
    fn bearer_header_should_succeed() {
        let credential = Credential::from("token-123");
        let header = credential.bearer_header().unwrap();

        assert_eq!(header.to_str().unwrap(), "Bearer token-123");
        assert!(header.is_sensitive());
    }

    #[test]
    fn bearer_header_rejects_control_characters() {
        let credential = Credential::from("bad\ntoken");

        let err = credential.bearer_header().unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Internal);
    }
}
