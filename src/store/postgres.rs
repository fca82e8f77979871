//! 存储 trait 的 PostgreSQL 实现
//!
//! 表结构位于 `migrations/`；启动时调用一次 [`PgAuthStore::migrate`]。
//! 过期过滤使用数据库时钟（`NOW()`）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::account::{AccountAuth, AccountStore, AccountTransaction, NewProfile, ProfileStore};
use crate::error::{Error, Result, StorageError};
use crate::token::{NewSession, Session, SessionKind, SessionStore};

const SESSION_COLUMNS: &str = "id::text AS id, account_id::text AS account_id, kind, user_agent, \
     refresh_token_hash, expires_at, refresh_expires_at, revoked_at, created_at";

#[derive(Debug, Clone, FromRow)]
struct SessionRow {
    id: String,
    account_id: Option<String>,
    kind: String,
    user_agent: String,
    refresh_token_hash: String,
    expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        let kind: SessionKind = row.kind.parse().map_err(|_| {
            Error::internal(format!("session {} has unknown kind '{}'", row.id, row.kind))
        })?;

        Ok(Self {
            id: row.id,
            account_id: row.account_id,
            kind,
            user_agent: row.user_agent,
            refresh_token_hash: row.refresh_token_hash,
            expires_at: row.expires_at,
            refresh_expires_at: row.refresh_expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct AccountAuthRow {
    account_id: String,
    email: String,
    password_hash: String,
    is_locked: bool,
    name: String,
    weight_kg: Option<f64>,
    height_cm: Option<f64>,
    age_years: Option<i16>,
}

impl From<AccountAuthRow> for AccountAuth {
    fn from(row: AccountAuthRow) -> Self {
        Self {
            account_id: row.account_id,
            email: row.email,
            password_hash: row.password_hash,
            is_locked: row.is_locked,
            name: row.name,
            weight_kg: row.weight_kg,
            height_cm: row.height_cm,
            age_years: row.age_years,
        }
    }
}

fn database(context: impl Into<String>, source: sqlx::Error) -> Error {
    Error::Storage(StorageError::Database {
        context: context.into(),
        source,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// ID 是调用方传入的文本；不是 UUID 的值不可能匹配任何记录。
fn parse_id(id: &str) -> Option<Uuid> {
    let parsed = Uuid::parse_str(id).ok();
    if parsed.is_none() {
        debug!(id, "id is not a uuid, no row can match");
    }
    parsed
}

/// 保存在 PostgreSQL 中的账户、用户资料与 Session
#[derive(Debug, Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 针对 `url` 打开连接池
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to connect to database");
                Error::Storage(StorageError::ConnectionFailed(e.to_string()))
            })?;
        Ok(Self::new(pool))
    }

    /// 执行内置的迁移
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::OperationFailed(e.to_string())))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_session(
        &self,
        kind: SessionKind,
        account_id: Option<&str>,
        session: &NewSession,
    ) -> Result<String> {
        sqlx::query_scalar::<_, String>(
            "INSERT INTO sessions (account_id, kind, user_agent, refresh_token_hash, expires_at, refresh_expires_at) \
             VALUES ($1::uuid, $2, $3, $4, $5, $6) \
             RETURNING id::text",
        )
        .bind(account_id)
        .bind(kind.as_str())
        .bind(&session.user_agent)
        .bind(&session.refresh_token_hash)
        .bind(session.expires_at)
        .bind(session.refresh_expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, kind = %kind, "failed to create session");
            database(format!("failed to create {} session", kind), e)
        })
    }
}

#[async_trait]
impl AccountStore for PgAuthStore {
    #[instrument(skip(self, email), name = "db_get_auth_by_email")]
    async fn get_auth_by_email(&self, email: &str) -> Result<Option<AccountAuth>> {
        let row = sqlx::query_as::<_, AccountAuthRow>(
            "SELECT a.id::text AS account_id, a.email, a.password_hash, a.is_locked, \
                    u.name, u.weight_kg, u.height_cm, u.age_years \
             FROM accounts a \
             JOIN users u ON u.account_id = a.id \
             WHERE a.email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database("failed to load account by email", e))?;

        Ok(row.map(AccountAuth::from))
    }

    async fn begin(&self) -> Result<Box<dyn AccountTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database("failed to begin transaction", e))?;
        Ok(Box::new(PgAccountTransaction { tx }))
    }

    #[instrument(skip(self), name = "db_set_account_locked")]
    async fn set_account_locked(&self, account_id: &str, locked: bool) -> Result<bool> {
        let Some(id) = parse_id(account_id) else {
            return Ok(false);
        };
        let result = sqlx::query("UPDATE accounts SET is_locked = $2 WHERE id = $1")
            .bind(id)
            .bind(locked)
            .execute(&self.pool)
            .await
            .map_err(|e| database(format!("failed to update lock on account {}", account_id), e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProfileStore for PgAuthStore {
    #[instrument(skip(self), name = "db_get_profile_id")]
    async fn get_profile_id_by_account_id(&self, account_id: &str) -> Result<Option<String>> {
        let Some(id) = parse_id(account_id) else {
            return Ok(None);
        };
        sqlx::query_scalar::<_, String>("SELECT id::text FROM users WHERE account_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database(format!("failed to load profile for account {}", account_id), e))
    }
}

#[async_trait]
impl SessionStore for PgAuthStore {
    #[instrument(skip(self, session), fields(user_agent = %session.user_agent), name = "db_create_user_session")]
    async fn create_user_session(&self, session: &NewSession) -> Result<String> {
        let account_id = session.account_id.as_deref().ok_or_else(|| {
            Error::Storage(StorageError::ConstraintViolation(
                "user session requires an account".into(),
            ))
        })?;
        self.insert_session(SessionKind::User, Some(account_id), session)
            .await
    }

    #[instrument(skip(self, session), fields(user_agent = %session.user_agent), name = "db_create_guest_session")]
    async fn create_guest_session(&self, session: &NewSession) -> Result<String> {
        self.insert_session(SessionKind::Guest, None, session).await
    }

    #[instrument(skip_all, name = "db_get_session_by_refresh_hash")]
    async fn get_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM sessions \
             WHERE refresh_token_hash = $1 AND revoked_at IS NULL AND refresh_expires_at > NOW()",
            SESSION_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database("failed to load session by refresh hash", e))?;

        row.map(Session::try_from).transpose()
    }

    #[instrument(skip(self), name = "db_revoke_session")]
    async fn revoke_by_id(&self, session_id: &str) -> Result<bool> {
        let Some(id) = parse_id(session_id) else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database(format!("failed to revoke session {}", session_id), e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), name = "db_revoke_device_sessions")]
    async fn revoke_by_account_and_user_agent(
        &self,
        account_id: &str,
        user_agent: &str,
    ) -> Result<u64> {
        let Some(id) = parse_id(account_id) else {
            return Ok(0);
        };
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = NOW() \
             WHERE account_id = $1 AND user_agent = $2 \
               AND revoked_at IS NULL AND refresh_expires_at > NOW()",
        )
        .bind(id)
        .bind(user_agent)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            database(
                format!("failed to revoke sessions for account {}", account_id),
                e,
            )
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), name = "db_count_recent_guest")]
    async fn count_recent_guest_by_user_agent(
        &self,
        user_agent: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sessions \
             WHERE kind = 'guest' AND user_agent = $1 AND created_at >= $2",
        )
        .bind(user_agent)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database("failed to count guest sessions", e))?;

        Ok(count.max(0) as u64)
    }

    /// 单条条件 `UPDATE ... RETURNING`；对同一哈希的并发领取会在行锁上
    /// 串行化，只有一个能匹配到记录。
    #[instrument(skip_all, name = "db_claim_session")]
    async fn claim_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE sessions SET revoked_at = NOW() \
             WHERE refresh_token_hash = $1 AND revoked_at IS NULL AND refresh_expires_at > NOW() \
             RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database("failed to claim session", e))?;

        row.map(Session::try_from).transpose()
    }
}

/// 某个池化连接上已开启的 `BEGIN`，drop 时回滚
struct PgAccountTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountTransaction for PgAccountTransaction {
    async fn create_account(&mut self, email: &str, password_hash: &str) -> Result<String> {
        sqlx::query_scalar::<_, String>(
            "INSERT INTO accounts (email, password_hash) VALUES ($1, $2) RETURNING id::text",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::AccountExists
            } else {
                database("failed to create account", e)
            }
        })
    }

    async fn create_profile(&mut self, profile: &NewProfile) -> Result<String> {
        sqlx::query_scalar::<_, String>(
            "INSERT INTO users (account_id, name, weight_kg, height_cm, age_years) \
             VALUES ($1::uuid, $2, $3, $4, $5) RETURNING id::text",
        )
        .bind(&profile.account_id)
        .bind(&profile.name)
        .bind(profile.weight_kg)
        .bind(profile.height_cm)
        .bind(profile.age_years)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::AccountExists
            } else {
                database("failed to create profile", e)
            }
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            if is_unique_violation(&e) {
                Error::AccountExists
            } else {
                Error::Storage(StorageError::CommitFailed(e.to_string()))
            }
        })
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| database("failed to roll back transaction", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()), Some(id));
        assert_eq!(parse_id(&id.hyphenated().to_string().to_uppercase()), Some(id));

        for bad in ["", "missing", "1", "not-a-uuid-at-all-0000000000000000"] {
            assert_eq!(parse_id(bad), None, "parsed {:?}", bad);
        }
    }

    /// 非 UUID 的未知 ID 不经过连接池直接应答
    #[tokio::test]
    async fn test_non_uuid_ids_are_absent() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unreachable")
            .unwrap();
        let store = PgAuthStore::new(pool);

        assert!(!store.revoke_by_id("missing").await.unwrap());
        assert_eq!(
            store
                .revoke_by_account_and_user_agent("missing", "ua")
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.get_profile_id_by_account_id("missing").await.unwrap(), None);
        assert!(!store.set_account_locked("missing", true).await.unwrap());
    }
}
