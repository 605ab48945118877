//! Hub-side authentication collaborator.
//!
//! The sync client treats tokens as opaque; only the hub interprets them.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use tokio::sync::RwLock;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Auth service unavailable: {0}")]
    Unavailable(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Username and password accepted by a hub
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Issues and checks bearer tokens
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> AuthResult<String>;

    async fn verify(&self, token: &str) -> AuthResult<()>;
}

/// One fixed account; issued tokens live in memory until revoked
pub struct StaticAuthenticator {
    credentials: Credentials,
    tokens: RwLock<HashSet<String>>,
    rng: SystemRandom,
}

impl fmt::Debug for StaticAuthenticator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StaticAuthenticator")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl StaticAuthenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            tokens: RwLock::new(HashSet::new()),
            rng: SystemRandom::new(),
        }
    }

    /// Forget every issued token, as if they all expired
    pub async fn revoke_all(&self) {
        self.tokens.write().await.clear();
    }

    fn issue_token(&self) -> AuthResult<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AuthError::Unavailable("failed to generate token".to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn login(&self, username: &str, password: &str) -> AuthResult<String> {
        if username.trim() != self.credentials.username || password != self.credentials.password {
            tracing::warn!(username, "Rejected login");
            return Err(AuthError::InvalidCredentials);
        }
        let token = self.issue_token()?;
        self.tokens.write().await.insert(token.clone());
        tracing::debug!(username, "Issued token");
        Ok(token)
    }

    async fn verify(&self, token: &str) -> AuthResult<()> {
        if self.tokens.read().await.contains(token) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> StaticAuthenticator {
        StaticAuthenticator::new(Credentials::new("alice", "secret"))
    }

    #[tokio::test]
    async fn issued_tokens_verify_until_revoked() {
        let auth = authenticator();
        let token = auth.login("alice", "secret").await.unwrap();
        assert!(auth.verify(&token).await.is_ok());

        auth.revoke_all().await;
        assert!(matches!(auth.verify(&token).await, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = authenticator();
        assert!(matches!(
            auth.login("alice", "nope").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let auth = authenticator();
        let first = auth.login("alice", "secret").await.unwrap();
        let second = auth.login("alice", "secret").await.unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("alice", "secret"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret"));
    }
}
