//! 账户与用户资料模块
//!
//! 账户是身份锚点（邮箱 + 密码哈希 + 锁定标记）。每个账户恰好有一份
//! 用户资料，并在同一事务中创建。资料中的身体数据是可选的：`None`
//! 表示“未设置”，与 0 不同。

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 去除首尾空白并转为小写
///
/// # Example
///
/// ```rust
/// use swimo_auth::account::normalize_email;
///
/// assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
/// ```
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 账户记录
#[derive(Clone, PartialEq)]
pub struct Account {
    pub id: String,
    /// 规范化后的邮箱，唯一
    pub email: String,
    pub password_hash: String,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn set_locked(&mut self, locked: bool) {
        self.is_locked = locked;
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("is_locked", &self.is_locked)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// 用户资料，与账户一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub age_years: Option<i16>,
}

/// 用户资料的插入数据
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub account_id: String,
    pub name: String,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub age_years: Option<i16>,
}

/// 账户及其用户资料，供登录使用
#[derive(Clone, PartialEq)]
pub struct AccountAuth {
    pub account_id: String,
    pub email: String,
    pub password_hash: String,
    pub is_locked: bool,
    pub name: String,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub age_years: Option<i16>,
}

impl fmt::Debug for AccountAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountAuth")
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("is_locked", &self.is_locked)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 账户存储
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 按规范化邮箱查询账户与资料，不存在时返回 `None`
    async fn get_auth_by_email(&self, email: &str) -> Result<Option<AccountAuth>>;

    /// 开启一个用于创建账户及其资料的事务
    async fn begin(&self) -> Result<Box<dyn AccountTransaction>>;

    /// 设置锁定标记。账户不存在时返回 `false`。
    async fn set_account_locked(&self, account_id: &str, locked: bool) -> Result<bool>;
}

/// 在 [`commit`](Self::commit) 时一并生效的写操作
///
/// 未提交就丢弃事务会撤销其中的写入。
#[async_trait]
pub trait AccountTransaction: Send {
    /// 插入账户并返回其 ID。邮箱已被占用时返回
    /// [`Error::AccountExists`](crate::Error::AccountExists)。
    async fn create_account(&mut self, email: &str, password_hash: &str) -> Result<String>;

    /// 为本事务中创建的账户插入用户资料
    async fn create_profile(&mut self, profile: &NewProfile) -> Result<String>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// 用户资料查询
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile_id_by_account_id(&self, account_id: &str) -> Result<Option<String>>;
}
