//! Credential provider contract.

use std::future::Future;
use std::pin::Pin;

/// A credential refresh failed; the upload cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("credential refresh failed: {0}")]
pub struct CredentialError(pub String);

/// Supplies the bearer token sent with each request.
///
/// Token acquisition belongs to the caller. The client only asks for a
/// refresh when the backend reports the current token as expired.
pub trait CredentialProvider: Send + Sync {
    /// Current token, if any.
    fn token(&self) -> Option<String>;

    /// Obtains a fresh token.
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<(), CredentialError>> + Send + '_>>;
}

/// A fixed token that cannot be refreshed.
#[derive(Debug)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<(), CredentialError>> + Send + '_>> {
        Box::pin(async {
            Err(CredentialError(
                "static token cannot be refreshed; sign in again".into(),
            ))
        })
    }
}
