use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, OtpChallenge, User, UserRow};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt user record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for user accounts. Every method is a single atomic update.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;

    /// Returns `StoreError::Conflict` if email or phone is taken.
    async fn insert(&self, new_user: NewUser) -> StoreResult<User>;

    /// Replaces any outstanding challenge.
    async fn set_otp(&self, id: Uuid, otp: &OtpChallenge) -> StoreResult<()>;

    /// Clears the challenge only while it still holds `code`.
    async fn clear_otp_if(&self, id: Uuid, code: &str) -> StoreResult<bool>;

    /// Activates the account and clears the challenge if it holds `code` and
    /// has not expired at `now`. Returns the updated user on success.
    async fn consume_otp(
        &self,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;

    /// Overwrites the password hash and clears any challenge.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;

    /// Like `update_password`, but only while the challenge holds `code` and
    /// has not expired at `now`. Returns whether the password was replaced.
    async fn update_password_if(
        &self,
        id: Uuid,
        password_hash: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;
}

const USER_COLUMNS: &str = "id, name, email, phone, password_hash, role, is_active, \
                            otp_code, otp_expires_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        row.map(to_user).transpose()
    }
}

fn to_user(row: UserRow) -> StoreResult<User> {
    User::try_from(row).map_err(StoreError::Corrupt)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        self.find_one("phone", phone).await
    }

    async fn insert(&self, new_user: NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, name, email, phone, password_hash, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        let res = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.name)
            .bind(&new_user.email)
            .bind(&new_user.phone)
            .bind(&new_user.password_hash)
            .bind(new_user.role.as_str())
            .fetch_one(&self.db)
            .await;

        match res {
            Ok(row) => to_user(row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StoreError::Conflict("Email or phone already exists".into()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_otp(&self, id: Uuid, otp: &OtpChallenge) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET otp_code = $2, otp_expires_at = $3, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&otp.code)
        .bind(otp.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn clear_otp_if(&self, id: Uuid, code: &str) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET otp_code = NULL, otp_expires_at = NULL, updated_at = now()
             WHERE id = $1 AND otp_code = $2
            "#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn consume_otp(
        &self,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
               SET is_active = TRUE, otp_code = NULL, otp_expires_at = NULL, updated_at = now()
             WHERE id = $1 AND otp_code = $2 AND otp_expires_at > $3
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(code)
            .bind(now)
            .fetch_optional(&self.db)
            .await?;
        row.map(to_user).transpose()
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, otp_code = NULL, otp_expires_at = NULL, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_password_if(
        &self,
        id: Uuid,
        password_hash: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, otp_code = NULL, otp_expires_at = NULL, updated_at = now()
             WHERE id = $1 AND otp_code = $3 AND otp_expires_at > $4
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(code)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
