//! 存储 trait 的内存实现
//!
//! 适用于测试和单进程部署。所有状态都在 `RwLock` 之后；ID 为随机
//! UUID。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{
    Account, AccountAuth, AccountStore, AccountTransaction, NewProfile, Profile, ProfileStore,
};
use crate::error::{Error, Result, StorageError};
use crate::token::{NewSession, Session, SessionKind, SessionStore};

#[derive(Debug, Default)]
struct AccountTables {
    accounts: HashMap<String, Account>,
    /// 规范化邮箱 -> 账户 ID
    by_email: HashMap<String, String>,
    /// 账户 ID -> 用户资料
    profiles: HashMap<String, Profile>,
}

/// 保存在进程内存中的账户、用户资料与 Session
#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    accounts: Arc<RwLock<AccountTables>>,
    sessions: RwLock<HashMap<String, Session>>,
}

fn poisoned() -> Error {
    Error::Storage(StorageError::OperationFailed("lock poisoned".into()))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_accounts(&self) -> Result<RwLockReadGuard<'_, AccountTables>> {
        self.accounts.read().map_err(|_| poisoned())
    }

    fn read_sessions(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Session>>> {
        self.sessions.read().map_err(|_| poisoned())
    }

    fn write_sessions(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Session>>> {
        self.sessions.write().map_err(|_| poisoned())
    }

    fn insert_session(&self, kind: SessionKind, new: &NewSession) -> Result<String> {
        let account_id = match kind {
            SessionKind::User => Some(new.account_id.clone().ok_or_else(|| {
                Error::Storage(StorageError::ConstraintViolation(
                    "user session requires an account".into(),
                ))
            })?),
            SessionKind::Guest => None,
        };

        let session = Session {
            id: new_id(),
            account_id,
            kind,
            user_agent: new.user_agent.clone(),
            refresh_token_hash: new.refresh_token_hash.clone(),
            expires_at: new.expires_at,
            refresh_expires_at: new.refresh_expires_at,
            revoked_at: None,
            created_at: Utc::now(),
        };

        let mut sessions = self.write_sessions()?;
        if sessions
            .values()
            .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(Error::Storage(StorageError::ConstraintViolation(
                "duplicate refresh token hash".into(),
            )));
        }

        let id = session.id.clone();
        sessions.insert(id.clone(), session);
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // 查看状态
    // ------------------------------------------------------------------------

    pub fn account_count(&self) -> Result<usize> {
        Ok(self.read_accounts()?.accounts.len())
    }

    pub fn profile_count(&self) -> Result<usize> {
        Ok(self.read_accounts()?.profiles.len())
    }

    pub fn session_count(&self) -> Result<usize> {
        Ok(self.read_sessions()?.len())
    }

    /// 单个 Session 的快照，无论是否已撤销
    pub fn session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.read_sessions()?.get(session_id).cloned())
    }

    /// 为 `user_agent` 创建的所有 Session，按创建时间从早到晚排列
    pub fn sessions_for_user_agent(&self, user_agent: &str) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .read_sessions()?
            .values()
            .filter(|s| s.user_agent == user_agent)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

#[async_trait]
impl AccountStore for InMemoryAuthStore {
    async fn get_auth_by_email(&self, email: &str) -> Result<Option<AccountAuth>> {
        let tables = self.read_accounts()?;
        let Some(account) = tables
            .by_email
            .get(email)
            .and_then(|id| tables.accounts.get(id))
        else {
            return Ok(None);
        };
        let Some(profile) = tables.profiles.get(&account.id) else {
            return Ok(None);
        };

        Ok(Some(AccountAuth {
            account_id: account.id.clone(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
            is_locked: account.is_locked,
            name: profile.name.clone(),
            weight_kg: profile.weight_kg,
            height_cm: profile.height_cm,
            age_years: profile.age_years,
        }))
    }

    async fn begin(&self) -> Result<Box<dyn AccountTransaction>> {
        Ok(Box::new(MemoryAccountTransaction {
            tables: Arc::clone(&self.accounts),
            accounts: Vec::new(),
            profiles: Vec::new(),
        }))
    }

    async fn set_account_locked(&self, account_id: &str, locked: bool) -> Result<bool> {
        let mut tables = self.accounts.write().map_err(|_| poisoned())?;
        match tables.accounts.get_mut(account_id) {
            Some(account) => {
                account.set_locked(locked);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryAuthStore {
    async fn get_profile_id_by_account_id(&self, account_id: &str) -> Result<Option<String>> {
        Ok(self
            .read_accounts()?
            .profiles
            .get(account_id)
            .map(|p| p.id.clone()))
    }
}

#[async_trait]
impl SessionStore for InMemoryAuthStore {
    async fn create_user_session(&self, session: &NewSession) -> Result<String> {
        self.insert_session(SessionKind::User, session)
    }

    async fn create_guest_session(&self, session: &NewSession) -> Result<String> {
        self.insert_session(SessionKind::Guest, session)
    }

    async fn get_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>> {
        let now = Utc::now();
        Ok(self
            .read_sessions()?
            .values()
            .find(|s| s.refresh_token_hash == hash && s.is_refreshable(now))
            .cloned())
    }

    async fn revoke_by_id(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.write_sessions()?;
        match sessions.get_mut(session_id) {
            Some(s) if s.revoked_at.is_none() => {
                s.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_account_and_user_agent(
        &self,
        account_id: &str,
        user_agent: &str,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.write_sessions()?;
        let mut revoked = 0;
        for s in sessions.values_mut() {
            if s.account_id.as_deref() == Some(account_id)
                && s.user_agent == user_agent
                && s.is_refreshable(now)
            {
                s.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn count_recent_guest_by_user_agent(
        &self,
        user_agent: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .read_sessions()?
            .values()
            .filter(|s| {
                s.kind == SessionKind::Guest && s.user_agent == user_agent && s.created_at >= since
            })
            .count() as u64)
    }

    /// 在同一把写锁下查找并撤销
    async fn claim_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>> {
        let now = Utc::now();
        let mut sessions = self.write_sessions()?;
        let Some(session) = sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == hash && s.is_refreshable(now))
        else {
            return Ok(None);
        };

        session.revoked_at = Some(now);
        Ok(Some(session.clone()))
    }
}

/// 在提交前缓存插入操作
struct MemoryAccountTransaction {
    tables: Arc<RwLock<AccountTables>>,
    accounts: Vec<Account>,
    profiles: Vec<Profile>,
}

impl MemoryAccountTransaction {
    fn email_taken(&self, tables: &AccountTables, email: &str) -> bool {
        tables.by_email.contains_key(email) || self.accounts.iter().any(|a| a.email == email)
    }
}

#[async_trait]
impl AccountTransaction for MemoryAccountTransaction {
    async fn create_account(&mut self, email: &str, password_hash: &str) -> Result<String> {
        {
            let tables = self.tables.read().map_err(|_| poisoned())?;
            if self.email_taken(&tables, email) {
                return Err(Error::AccountExists);
            }
        }

        let account = Account {
            id: new_id(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_locked: false,
            created_at: Utc::now(),
        };
        let id = account.id.clone();
        self.accounts.push(account);
        Ok(id)
    }

    async fn create_profile(&mut self, profile: &NewProfile) -> Result<String> {
        if !self.accounts.iter().any(|a| a.id == profile.account_id) {
            return Err(Error::Storage(StorageError::ConstraintViolation(format!(
                "profile references unknown account {}",
                profile.account_id
            ))));
        }
        if self.profiles.iter().any(|p| p.account_id == profile.account_id) {
            return Err(Error::Storage(StorageError::ConstraintViolation(
                "account already has a profile".into(),
            )));
        }

        let profile = Profile {
            id: new_id(),
            account_id: profile.account_id.clone(),
            name: profile.name.clone(),
            weight_kg: profile.weight_kg,
            height_cm: profile.height_cm,
            age_years: profile.age_years,
        };
        let id = profile.id.clone();
        self.profiles.push(profile);
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            tables,
            accounts,
            profiles,
        } = *self;
        let mut tables = tables.write().map_err(|_| poisoned())?;

        // 本事务开始后，其他事务可能已经提交了相同的邮箱
        if accounts
            .iter()
            .any(|a| tables.by_email.contains_key(&a.email))
        {
            return Err(Error::AccountExists);
        }

        for account in accounts {
            tables
                .by_email
                .insert(account.email.clone(), account.id.clone());
            tables.accounts.insert(account.id.clone(), account);
        }
        for profile in profiles {
            tables.profiles.insert(profile.account_id.clone(), profile);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
