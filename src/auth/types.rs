//! Authentication user types.

use crate::jwt::SubjectClaims;

/// Caller identity taken from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub subject: SubjectClaims,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.subject.user_id
    }
}
