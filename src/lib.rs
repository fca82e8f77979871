//! # swimo-auth
//!
//! Session 与 Token 生命周期引擎。
//!
//! ## 功能特性
//!
//! - **账户**: 邮箱 + 密码注册，账户与用户资料在同一事务中创建
//! - **Access Token**: HS256 签名，无状态，短有效期
//! - **Refresh 凭证**: 不透明、一次性，每次刷新都会轮换
//! - **设备 Session**: 每个账户在每个 User-Agent 上只保留一个有效 Session
//! - **访客 Session**: 匿名访问，按 User-Agent 限流
//! - **取消**: 所有操作都遵循 [`RequestContext`] 的取消与截止时间
//!
//! ## Features
//!
//! - `argon2` - 启用 Argon2id 密码哈希（默认启用）
//! - `bcrypt` - 启用 bcrypt 密码哈希（默认启用）
//! - `postgres` - 启用 sqlx/PostgreSQL 存储
//! - `full` - 启用所有功能
//!
//! ## 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use swimo_auth::auth::{SignInRequest, SignUpRequest};
//! use swimo_auth::store::InMemoryAuthStore;
//! use swimo_auth::{AuthConfig, AuthUsecase, RequestContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> swimo_auth::Result<()> {
//! let store = Arc::new(InMemoryAuthStore::new());
//! let config = AuthConfig::new("an-hmac-secret-that-is-at-least-32-bytes");
//! let auth = AuthUsecase::new(config, store.clone(), store.clone(), store)?;
//! let ctx = RequestContext::new();
//!
//! auth.sign_up(&ctx, &SignUpRequest {
//!     email: "a@b.com".into(),
//!     password: "secret123".into(),
//!     confirm_password: "secret123".into(),
//!     name: "A".into(),
//!     weight: Some(70.0),
//!     height: Some(170.0),
//!     age: Some(30),
//! }).await?;
//!
//! let signed_in = auth.sign_in(&ctx, &SignInRequest {
//!     email: "a@b.com".into(),
//!     password: "secret123".into(),
//! }, "Mozilla/5.0").await?;
//!
//! let claims = auth.authenticate(&format!("Bearer {}", signed_in.tokens.access_token))?;
//! assert!(claims.aid.is_some());
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod password;
pub mod random;
pub mod security;
pub mod store;
pub mod token;

pub use auth::AuthUsecase;
pub use config::AuthConfig;
pub use context::RequestContext;
pub use error::{Error, ErrorCode, Result};

// ============================================================================
// 存储 trait
// ============================================================================

pub use account::{AccountStore, AccountTransaction, ProfileStore};
pub use token::SessionStore;

// ============================================================================
// 密码
// ============================================================================

pub use password::{Algorithm, CredentialVerifier, PasswordHasher};

// ============================================================================
// Token
// ============================================================================

pub use token::{AccessClaims, AccessTokenCodec, Principal, RefreshSecret, SessionKind};

// ============================================================================
// 随机数
// ============================================================================

pub use random::{
    constant_time_compare, constant_time_compare_str, generate_random_bytes, generate_random_hex,
};
