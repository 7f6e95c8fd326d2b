//! Token issuer: mints access/refresh pairs and verifies them.
//!
//! Access tokens are verified statelessly (signature + expiry). Refresh
//! tokens additionally re-resolve their subject against the user directory,
//! so a deleted user cannot refresh. A user deleted mid-session keeps a
//! working access token until it expires; that window is bounded by the
//! access token lifetime.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use crate::db::User;
use crate::jwt::{JwtConfig, JwtError, SubjectClaims, TokenPair};

/// Resolves a stable application user id to the stored user.
pub trait UserDirectory: Send + Sync + 'static {
    fn find_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<User>, Box<dyn Error + Send + Sync>>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    #[error("Token expired")]
    Expired,
    #[error("Token invalid")]
    Invalid,
    #[error("Subject no longer exists")]
    SubjectNotFound,
    #[error("User directory error: {0}")]
    Directory(String),
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl From<JwtError> for IssuerError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::Expired => IssuerError::Expired,
            JwtError::Invalid(_) | JwtError::WrongTokenType => IssuerError::Invalid,
            JwtError::Encoding(_) | JwtError::TimeError => IssuerError::Signing(e.to_string()),
        }
    }
}

pub struct TokenIssuer<D> {
    jwt: Arc<JwtConfig>,
    directory: D,
}

impl<D: UserDirectory> TokenIssuer<D> {
    pub fn new(jwt: Arc<JwtConfig>, directory: D) -> Self {
        Self { jwt, directory }
    }

    pub fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    /// Mint a fresh access/refresh pair for the subject.
    pub fn mint_pair(&self, subject: &SubjectClaims) -> Result<TokenPair, IssuerError> {
        Ok(self.jwt.mint_pair(subject)?)
    }

    /// Stateless verification used by protected endpoints.
    pub fn verify_access(&self, token: &str) -> Result<SubjectClaims, IssuerError> {
        Ok(self.jwt.verify_access(token)?.subject())
    }

    /// Verify a refresh token and re-resolve its subject.
    pub async fn verify_refresh(&self, token: &str) -> Result<(SubjectClaims, User), IssuerError> {
        let claims = self.jwt.verify_refresh(token)?;

        let user = self
            .directory
            .find_user(&claims.sub)
            .await
            .map_err(|e| IssuerError::Directory(e.to_string()))?
            .ok_or(IssuerError::SubjectNotFound)?;

        let subject = SubjectClaims {
            user_id: user.user_id.clone(),
            provider: user.provider,
        };
        Ok((subject, user))
    }

    /// Exchange a refresh token for a new pair signed for the re-resolved subject.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(User, TokenPair), IssuerError> {
        let (subject, user) = self.verify_refresh(refresh_token).await?;
        let pair = self.mint_pair(&subject)?;
        Ok((user, pair))
    }
}
