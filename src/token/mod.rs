//! Token 与 Session 模块
//!
//! ## 子模块
//!
//! - **jwt**: 签名的无状态 Access Token
//! - **refresh**: 不透明的一次性 Refresh 凭证
//! - **session**: 服务端 Session 记录与 [`SessionStore`] trait
//!
//! ## 示例
//!
//! ```rust
//! use swimo_auth::token::{AccessTokenCodec, Principal, RefreshSecret};
//! use swimo_auth::AuthConfig;
//!
//! let config = AuthConfig::new("an-hmac-secret-that-is-at-least-32-bytes");
//! let codec = AccessTokenCodec::from_config(&config);
//!
//! let issued = codec.issue("session-1", &Principal::user("acc-1", "usr-1")).unwrap();
//! let claims = codec.verify(&issued.token).unwrap();
//! assert_eq!(claims.aid.as_deref(), Some("acc-1"));
//!
//! let refresh = RefreshSecret::generate(config.refresh_token_bytes).unwrap();
//! assert_eq!(refresh.as_str().len(), 64);
//! ```

pub mod jwt;
pub mod refresh;
pub mod session;

pub use jwt::{
    AccessClaims, AccessTokenCodec, IssuedToken, Principal, bearer_token, issue_access_token,
    issue_access_token_at, verify_access_token, verify_access_token_at,
};
pub use refresh::{REFRESH_SECRET_LEN, RefreshSecret, generate_refresh_secret};
pub use session::{NewSession, Session, SessionKind, SessionState, SessionStore};
