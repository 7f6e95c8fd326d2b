//! JWT token generation and validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::identity::Provider;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token (1 hour) - verified by signature and expiry only
    Access,
    /// Long-lived refresh token (30 days) - subject is re-resolved on use
    Refresh,
}

/// JWT claims shared by access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (application user id, e.g. `kakao_12345`)
    pub sub: String,
    /// Identity provider the subject logged in with
    pub provider: Provider,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Unique token id, keeps two tokens minted in the same second distinct
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl Claims {
    pub fn subject(&self) -> SubjectClaims {
        SubjectClaims {
            user_id: self.sub.clone(),
            provider: self.provider,
        }
    }
}

/// The identity both tokens of a pair are signed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectClaims {
    pub user_id: String,
    pub provider: Provider,
}

/// Access token duration: 1 hour
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 60 * 60;

/// Refresh token duration: 30 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiration of the access token (Unix seconds)
    pub access_expires_at: u64,
    /// Expiration of the refresh token (Unix seconds)
    pub refresh_expires_at: u64,
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: u64,
    refresh_ttl: u64,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret and default lifetimes.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: ACCESS_TOKEN_DURATION_SECS,
            refresh_ttl: REFRESH_TOKEN_DURATION_SECS,
        }
    }

    /// Override token lifetimes (seconds).
    pub fn with_lifetimes(mut self, access_secs: u64, refresh_secs: u64) -> Self {
        self.access_ttl = access_secs;
        self.refresh_ttl = refresh_secs;
        self
    }

    pub fn access_ttl(&self) -> u64 {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> u64 {
        self.refresh_ttl
    }

    /// Mint an access/refresh pair issued now.
    pub fn mint_pair(&self, subject: &SubjectClaims) -> Result<TokenPair, JwtError> {
        self.mint_pair_at(subject, now_secs()?)
    }

    /// Mint an access/refresh pair as if issued at `issued_at`.
    pub fn mint_pair_at(
        &self,
        subject: &SubjectClaims,
        issued_at: u64,
    ) -> Result<TokenPair, JwtError> {
        let access_expires_at = issued_at + self.access_ttl;
        let refresh_expires_at = issued_at + self.refresh_ttl;

        let access_token = self.sign(subject, TokenType::Access, issued_at, access_expires_at)?;
        let refresh_token =
            self.sign(subject, TokenType::Refresh, issued_at, refresh_expires_at)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    fn sign(
        &self,
        subject: &SubjectClaims,
        token_type: TokenType,
        iat: u64,
        exp: u64,
    ) -> Result<String, JwtError> {
        let claims = Claims {
            sub: subject.user_id.clone(),
            provider: subject.provider,
            token_type,
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)
    }

    /// Validate and decode an access token.
    pub fn verify_access(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Access)
    }

    /// Validate and decode a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Refresh)
    }

    fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e),
            })?;

        if token_data.claims.token_type != expected {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

fn now_secs() -> Result<u64, JwtError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| JwtError::TimeError)?
        .as_secs())
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    /// Signature is valid but `exp` has passed
    #[error("Token expired")]
    Expired,
    /// Malformed token or bad signature
    #[error("Invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    /// Using a refresh token as access token or the other way round
    #[error("Wrong token type")]
    WrongTokenType,
    #[error("System time error")]
    TimeError,
}
