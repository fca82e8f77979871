//! 凭证校验模块

use std::sync::{Arc, OnceLock};

use tracing::warn;

use super::hasher::PasswordHasher;
use crate::error::{Error, Result};

/// 把候选密码与存储的哈希进行比较
///
/// 所有失败（包括无法解析的存储哈希）都会变成
/// [`Error::InvalidCredentials`]。[`burn`](Self::burn) 对不存在的账户执行
/// 同样的计算，使两种情况耗时相当。
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    hasher: PasswordHasher,
    dummy_hash: Arc<OnceLock<String>>,
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new(PasswordHasher::default())
    }
}

impl CredentialVerifier {
    pub fn new(hasher: PasswordHasher) -> Self {
        Self {
            hasher,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// `candidate` 与 `stored_hash` 匹配时返回 `Ok(())`，否则返回
    /// `InvalidCredentials`。
    pub async fn compare(&self, stored_hash: &str, candidate: &str) -> Result<()> {
        match self.hasher.verify_blocking(candidate, stored_hash).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::InvalidCredentials),
            Err(Error::PasswordHash(e)) => {
                warn!(error = %e, "stored password hash could not be verified");
                Err(Error::InvalidCredentials)
            }
            Err(e) => Err(e),
        }
    }

    /// 执行一次结果会被丢弃的校验
    pub async fn burn(&self, candidate: &str) {
        let verifier = self.clone();
        let candidate = candidate.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            verifier.hasher.verify(&candidate, verifier.dummy_hash())
        })
        .await;

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "dummy hash verification failed unexpectedly"),
            Err(e) => warn!(error = %e, "dummy hash verification task failed"),
        }
    }

    fn dummy_hash(&self) -> &str {
        self.dummy_hash.get_or_init(|| {
            self.hasher
                .hash("dummy_startup_value")
                .unwrap_or_else(|_| DUMMY_FALLBACK.to_string())
        })
    }
}

/// 能被当前编译进来的算法解析为哈希
#[cfg(feature = "argon2")]
const DUMMY_FALLBACK: &str = "$argon2id$v=19$m=19456,t=2,p=1$dW5rbm93bg$dW5rbm93bg";
#[cfg(not(feature = "argon2"))]
const DUMMY_FALLBACK: &str = "$2b$12$C6UzMDM.H6dfI/f/IKcEeO5pBxJ6N8p0wY8s0ZJ1xQmC6dM8Qm3eS";
