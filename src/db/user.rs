use std::error::Error;
use std::future::Future;

use sqlx::sqlite::SqlitePool;

use crate::identity::{Provider, ProviderProfile};
use crate::issuer::UserDirectory;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    /// Stable application id, `{provider}_{provider_id}`
    pub user_id: String,
    pub provider: Provider,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
    pub role: UserRole,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    user_id: String,
    provider: String,
    nickname: Option<String>,
    email: Option<String>,
    profile_image_url: Option<String>,
    role: String,
}

impl TryFrom<UserRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let provider = row
            .provider
            .parse::<Provider>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            provider,
            nickname: row.nickname,
            email: row.email,
            profile_image_url: row.profile_image_url,
            role: UserRole::from_str(&row.role),
        })
    }
}

const USER_COLUMNS: &str = "id, user_id, provider, nickname, email, profile_image_url, role";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a user by application user id.
    pub async fn get_by_user_id(&self, user_id: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(sqlx::AssertSqlSafe(format!(
                "SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"
            )))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    /// Find or create the user for a provider profile. Existing users get
    /// their email and image refreshed; a nickname they already set is kept.
    pub async fn upsert_from_profile(
        &self,
        provider: Provider,
        profile: &ProviderProfile,
    ) -> Result<User, sqlx::Error> {
        let user_id = provider.user_id(&profile.provider_id);
        let nickname = profile
            .nickname
            .clone()
            .unwrap_or_else(|| provider.default_nickname().to_string());

        sqlx::query(
            "INSERT INTO users (user_id, provider, nickname, email, profile_image_url)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                profile_image_url = excluded.profile_image_url,
                nickname = COALESCE(users.nickname, excluded.nickname)",
        )
        .bind(&user_id)
        .bind(provider.as_str())
        .bind(&nickname)
        .bind(&profile.email)
        .bind(&profile.profile_image_url)
        .execute(&self.pool)
        .await?;

        self.get_by_user_id(&user_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Update the nickname. Returns false if the user does not exist.
    pub async fn update_nickname(&self, user_id: &str, nickname: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET nickname = ? WHERE user_id = ?")
            .bind(nickname)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the role for a user.
    pub async fn set_role(&self, user_id: &str, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE user_id = ?")
            .bind(role.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a user by application user id.
    pub async fn delete(&self, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl UserDirectory for UserStore {
    fn find_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<User>, Box<dyn Error + Send + Sync>>> + Send {
        let user_id = user_id.to_string();
        async move {
            self.get_by_user_id(&user_id)
                .await
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
        }
    }
}
