//! 密码哈希与凭证校验模块
//!
//! ## 支持的算法
//!
//! - **Argon2id**（默认，`argon2` feature）
//! - **bcrypt**（`bcrypt` feature）；无论选择哪种算法，已有的 bcrypt
//!   哈希都能通过验证
//!
//! ## 示例
//!
//! ```rust
//! use swimo_auth::password::PasswordHasher;
//!
//! let hasher = PasswordHasher::default();
//! let hash = hasher.hash("my_secure_password").unwrap();
//! assert!(hasher.verify("my_secure_password", &hash).unwrap());
//! ```

mod credentials;
mod hasher;

pub use credentials::CredentialVerifier;
pub use hasher::{Algorithm, PasswordHasher};

#[cfg(feature = "bcrypt")]
pub use hasher::DEFAULT_BCRYPT_COST;
