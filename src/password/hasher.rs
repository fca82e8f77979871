//! 密码哈希实现
//!
//! 新哈希使用配置的算法；验证时根据存储哈希的前缀识别算法，
//! 因此切换到 Argon2id 之后，用 bcrypt 创建的账户仍然可以正常登录。

#[cfg(feature = "argon2")]
use argon2::Argon2;

#[cfg(feature = "argon2")]
use password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};

use crate::error::{Error, PasswordHashError, Result};

/// 支持的哈希算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Argon2id，新哈希的默认算法
    #[cfg(feature = "argon2")]
    Argon2id,

    /// bcrypt
    #[cfg(feature = "bcrypt")]
    Bcrypt,
}

#[cfg(not(any(feature = "argon2", feature = "bcrypt")))]
compile_error!(
    "At least one password hashing algorithm (argon2 or bcrypt) must be enabled."
);

#[allow(clippy::derivable_impls)]
impl Default for Algorithm {
    fn default() -> Self {
        #[cfg(feature = "argon2")]
        {
            Algorithm::Argon2id
        }
        #[cfg(all(not(feature = "argon2"), feature = "bcrypt"))]
        {
            Algorithm::Bcrypt
        }
    }
}

/// 默认 bcrypt cost
#[cfg(feature = "bcrypt")]
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// 密码哈希器配置
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    algorithm: Algorithm,

    /// bcrypt cost（4-31）
    #[cfg(feature = "bcrypt")]
    bcrypt_cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(Algorithm::default())
    }
}

impl PasswordHasher {
    /// # Example
    ///
    /// ```rust
    /// use swimo_auth::password::{PasswordHasher, Algorithm};
    ///
    /// # #[cfg(feature = "argon2")]
    /// let hasher = PasswordHasher::new(Algorithm::Argon2id);
    /// ```
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            #[cfg(feature = "bcrypt")]
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// 设置 bcrypt cost
    ///
    /// # Errors
    ///
    /// `cost` 不在 4-31 范围内时返回 `PasswordHashError::UnsupportedAlgorithm`。
    #[cfg(feature = "bcrypt")]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Result<Self> {
        if !(4..=31).contains(&cost) {
            return Err(Error::PasswordHash(PasswordHashError::UnsupportedAlgorithm(
                format!("bcrypt cost must be between 4 and 31, got {}", cost),
            )));
        }
        self.bcrypt_cost = cost;
        Ok(self)
    }

    /// 使用配置的算法哈希密码
    ///
    /// CPU 密集型操作；异步调用方应使用 [`hash_blocking`](Self::hash_blocking)。
    ///
    /// # Example
    ///
    /// ```rust
    /// use swimo_auth::password::PasswordHasher;
    ///
    /// let hasher = PasswordHasher::default();
    /// let hash = hasher.hash("my_password").unwrap();
    /// # #[cfg(feature = "argon2")]
    /// assert!(hash.starts_with("$argon2"));
    /// ```
    pub fn hash(&self, password: &str) -> Result<String> {
        match self.algorithm {
            #[cfg(feature = "argon2")]
            Algorithm::Argon2id => self.hash_argon2(password),
            #[cfg(feature = "bcrypt")]
            Algorithm::Bcrypt => self.hash_bcrypt(password),
        }
    }

    /// 用存储的哈希校验密码
    ///
    /// 不匹配时返回 `Ok(false)`，哈希格式无法识别时返回错误。
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        #[cfg(feature = "argon2")]
        if hash.starts_with("$argon2") {
            return self.verify_argon2(password, hash);
        }
        #[cfg(feature = "bcrypt")]
        if hash.starts_with("$2") {
            return self.verify_bcrypt(password, hash);
        }
        Err(Error::PasswordHash(PasswordHashError::InvalidFormat(
            "unknown hash format".to_string(),
        )))
    }

    /// 在阻塞线程池上执行 [`hash`](Self::hash)
    pub async fn hash_blocking(&self, password: &str) -> Result<String> {
        let hasher = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| Error::internal(format!("password hashing task failed: {}", e)))?
    }

    /// 在阻塞线程池上执行 [`verify`](Self::verify)
    pub async fn verify_blocking(&self, password: &str, hash: &str) -> Result<bool> {
        let hasher = self.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| Error::internal(format!("password verification task failed: {}", e)))?
    }

    // ========================================================================
    // Argon2
    // ========================================================================

    #[cfg(feature = "argon2")]
    fn hash_argon2(&self, password: &str) -> Result<String> {
        let salt_bytes = crate::random::generate_random_bytes(16)?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| {
            Error::PasswordHash(PasswordHashError::HashFailed(format!(
                "failed to encode salt: {}",
                e
            )))
        })?;

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| {
                Error::PasswordHash(PasswordHashError::HashFailed(format!(
                    "Argon2 hash failed: {}",
                    e
                )))
            })
    }

    #[cfg(feature = "argon2")]
    fn verify_argon2(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            Error::PasswordHash(PasswordHashError::InvalidFormat(format!(
                "invalid Argon2 hash: {}",
                e
            )))
        })?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    // ========================================================================
    // bcrypt
    // ========================================================================

    #[cfg(feature = "bcrypt")]
    fn hash_bcrypt(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.bcrypt_cost).map_err(|e| {
            Error::PasswordHash(PasswordHashError::HashFailed(format!(
                "bcrypt hash failed: {}",
                e
            )))
        })
    }

    #[cfg(feature = "bcrypt")]
    fn verify_bcrypt(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash).map_err(|e| {
            Error::PasswordHash(PasswordHashError::InvalidFormat(format!(
                "bcrypt verify failed: {}",
                e
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "argon2")]
    fn test_argon2_hash_and_verify() {
        let hasher = PasswordHasher::new(Algorithm::Argon2id);
        let password = "test_password_123";

        let hash = hasher.hash(password).unwrap();
        assert!(hash.starts_with("$argon2id"));

        assert!(hasher.verify(password, &hash).unwrap());
        assert!(!hasher.verify("wrong_password", &hash).unwrap());
    }

    #[test]
    #[cfg(feature = "bcrypt")]
    fn test_bcrypt_hash_and_verify() {
        let hasher = PasswordHasher::new(Algorithm::Bcrypt)
            .with_bcrypt_cost(4)
            .unwrap();
        let password = "test_password_123";

        let hash = hasher.hash(password).unwrap();
        assert!(hash.starts_with("$2"));

        assert!(hasher.verify(password, &hash).unwrap());
        assert!(!hasher.verify("wrong_password", &hash).unwrap());
    }

    #[test]
    #[cfg(all(feature = "argon2", feature = "bcrypt"))]
    fn test_auto_detect_algorithm() {
        let argon2 = PasswordHasher::new(Algorithm::Argon2id);
        let bcrypt = PasswordHasher::new(Algorithm::Bcrypt)
            .with_bcrypt_cost(4)
            .unwrap();

        let bcrypt_hash = bcrypt.hash("test").unwrap();
        assert!(argon2.verify("test", &bcrypt_hash).unwrap());

        let argon2_hash = argon2.hash("test").unwrap();
        assert!(bcrypt.verify("test", &argon2_hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        let hasher = PasswordHasher::default();
        assert!(matches!(
            hasher.verify("test", "invalid_hash"),
            Err(Error::PasswordHash(PasswordHashError::InvalidFormat(_)))
        ));
    }

    #[test]
    #[cfg(feature = "bcrypt")]
    fn test_invalid_bcrypt_cost() {
        assert!(PasswordHasher::new(Algorithm::Bcrypt).with_bcrypt_cost(3).is_err());
        assert!(PasswordHasher::new(Algorithm::Bcrypt).with_bcrypt_cost(32).is_err());
    }

    #[test]
    fn test_different_hashes_same_password() {
        let hasher = PasswordHasher::default();
        let hash1 = hasher.hash("same_password").unwrap();
        let hash2 = hasher.hash("same_password").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify("same_password", &hash1).unwrap());
        assert!(hasher.verify("same_password", &hash2).unwrap());
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hasher = PasswordHasher::default();
        let hash = hasher.hash_blocking("secret123").await.unwrap();
        assert!(hasher.verify_blocking("secret123", &hash).await.unwrap());
        assert!(!hasher.verify_blocking("secret124", &hash).await.unwrap());
    }
}
