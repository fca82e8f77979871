//! Session 实现模块
//!
//! Session 把一个设备（以 User-Agent 标识）绑定到一个可选的账户，
//! 并持有该设备的 Refresh 凭证。Session 永远不会被删除；撤销只是写入
//! `revoked_at`，且不可逆。
//!
//! ```text
//!   create ──► Active ──(refresh_expires_at passes)──► Expired
//!                │
//!                └──(revoke)──► Revoked
//! ```
//!
//! 持久化通过 [`SessionStore`] trait 完成，参见
//! [`InMemoryAuthStore`](crate::store::InMemoryAuthStore)，以及启用
//! `postgres` feature 时的 `PgAuthStore`。

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::refresh::RefreshSecret;
use crate::config::AuthConfig;
use crate::error::{Error, Result, TokenError};

/// Session 类型，同时作为 Access Token 的 `kind` Claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    User,
    Guest,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::User => "user",
            SessionKind::Guest => "guest",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(SessionKind::User),
            "guest" => Ok(SessionKind::Guest),
            other => Err(Error::Token(TokenError::InvalidFormat(format!(
                "unknown session kind '{}'",
                other
            )))),
        }
    }
}

/// 某一时刻由 Session 记录推导出的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 未撤销且 Refresh 凭证仍然有效
    Active,
    /// Refresh 凭证已过期
    Expired,
    /// 已被显式撤销（终态）
    Revoked,
}

/// 持久化的 Session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// 访客为 `None`
    pub account_id: Option<String>,
    pub kind: SessionKind,
    pub user_agent: String,
    /// 交给客户端的 Refresh 凭证
    pub refresh_token_hash: String,
    /// 随此 Session 签发的 Access Token 的过期时间
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if self.refresh_expires_at <= now {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// `revoked_at IS NULL AND refresh_expires_at > now`
    pub fn is_refreshable(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Active
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("kind", &self.kind)
            .field("user_agent", &self.user_agent)
            .field("refresh_token_hash", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("revoked_at", &self.revoked_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Session 的插入数据
#[derive(Clone)]
pub struct NewSession {
    pub kind: SessionKind,
    pub account_id: Option<String>,
    pub user_agent: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl NewSession {
    /// 以 `now` 为起点、按 `config` 中的有效期构建 Session
    ///
    /// 缺少 `account_id` 时总是生成访客 Session。任一过期时间超出
    /// 可表示的时间范围时返回错误。
    pub fn new(
        kind: SessionKind,
        account_id: Option<String>,
        user_agent: impl Into<String>,
        refresh: &RefreshSecret,
        config: &AuthConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let kind = if account_id.is_none() {
            SessionKind::Guest
        } else {
            kind
        };

        let expiry = |ttl: chrono::Duration| {
            now.checked_add_signed(ttl)
                .ok_or_else(|| Error::internal("session expiry out of range"))
        };

        Ok(Self {
            kind,
            account_id,
            user_agent: user_agent.into(),
            refresh_token_hash: refresh.as_str().to_string(),
            expires_at: expiry(config.access_ttl)?,
            refresh_expires_at: expiry(config.refresh_ttl)?,
        })
    }
}

impl fmt::Debug for NewSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSession")
            .field("kind", &self.kind)
            .field("account_id", &self.account_id)
            .field("user_agent", &self.user_agent)
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Session 存储
///
/// 过期过滤由实现方的时钟负责（存储端的 `now()`），因此已过期或
/// 已撤销的 Session 与从未存在过的 Session 无法区分。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 插入 `user` Session。没有账户时返回
    /// `StorageError::ConstraintViolation`。
    async fn create_user_session(&self, session: &NewSession) -> Result<String>;

    /// 插入不关联账户的 `guest` Session，忽略 `session.kind`
    async fn create_guest_session(&self, session: &NewSession) -> Result<String>;

    /// 持有 `hash` 的可刷新 Session（如果有）
    async fn get_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>>;

    /// 撤销 Session。本次调用完成撤销时返回 `true`；未知或已撤销的
    /// ID 返回 `false`，不视为错误。
    async fn revoke_by_id(&self, session_id: &str) -> Result<bool>;

    /// 撤销该账户在此设备上所有仍可刷新的 Session，返回撤销数量
    /// （可以为 0）。
    async fn revoke_by_account_and_user_agent(
        &self,
        account_id: &str,
        user_agent: &str,
    ) -> Result<u64>;

    /// `since` 及之后为 `user_agent` 创建的访客 Session 数，
    /// 包括已撤销的。
    async fn count_recent_guest_by_user_agent(
        &self,
        user_agent: &str,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// 查找持有 `hash` 的可刷新 Session 并撤销它
    ///
    /// 同一凭证只有一个调用方能领取成功。默认实现需要两次往返，
    /// 两个并发查询可能在任一撤销之前都看到该 Session；只有撤销生效的
    /// 那个调用方会得到 `Some`。支持条件更新的存储应覆盖此方法。
    async fn claim_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session_by_refresh_hash(hash).await? else {
            return Ok(None);
        };

        if !self.revoke_by_id(&session.id).await? {
            return Ok(None);
        }

        session.revoked_at = Some(Utc::now());
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            id: "s1".into(),
            account_id: None,
            kind: SessionKind::Guest,
            user_agent: "ua".into(),
            refresh_token_hash: "a".repeat(64),
            expires_at: now + Duration::minutes(15),
            refresh_expires_at: now + Duration::days(30),
            revoked_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_session_kind_serde() {
        assert_eq!(serde_json::to_string(&SessionKind::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::from_str::<SessionKind>(r#""guest""#).unwrap(),
            SessionKind::Guest
        );
        assert_eq!("user".parse::<SessionKind>().unwrap(), SessionKind::User);
        assert!("admin".parse::<SessionKind>().is_err());
        assert_eq!(SessionKind::Guest.to_string(), "guest");
    }

    #[test]
    fn test_session_state() {
        let now = Utc::now();
        let mut s = session(now);
        assert_eq!(s.state(now), SessionState::Active);
        assert!(s.is_refreshable(now));

        // Refresh 过期时间是开区间
        assert_eq!(s.state(s.refresh_expires_at), SessionState::Expired);
        assert!(!s.is_refreshable(now + Duration::days(31)));

        s.revoked_at = Some(now);
        assert_eq!(s.state(now), SessionState::Revoked);
        assert!(!s.is_refreshable(now));
    }

    #[test]
    fn test_new_session_guest_without_account() {
        let config = AuthConfig::new("0123456789abcdef0123456789abcdef");
        let refresh = RefreshSecret::generate(32).unwrap();
        let now = Utc::now();

        let s = NewSession::new(SessionKind::User, None, "ua", &refresh, &config, now).unwrap();
        assert_eq!(s.kind, SessionKind::Guest);
        assert_eq!(s.refresh_token_hash, refresh.as_str());
        assert_eq!(s.expires_at, now + Duration::minutes(15));
        assert_eq!(s.refresh_expires_at, now + Duration::days(30));
    }

    #[test]
    fn test_new_session_expiry_overflow() {
        let config = AuthConfig::new("0123456789abcdef0123456789abcdef")
            .with_refresh_ttl(Duration::days(100_000_000_000));
        let refresh = RefreshSecret::generate(32).unwrap();

        let err = NewSession::new(SessionKind::Guest, None, "ua", &refresh, &config, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_debug_redacts_refresh_hash() {
        let s = session(Utc::now());
        assert!(!format!("{:?}", s).contains(&s.refresh_token_hash));
    }
}
