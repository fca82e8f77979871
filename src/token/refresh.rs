//! Refresh 凭证模块
//!
//! Refresh 凭证是 `n` 个随机字节经 SHA-256 摘要后的小写十六进制字符串
//! （64 个字符）。客户端持有的与 Session 记录中存储的都是这个摘要，
//! 查询按精确匹配进行。它是一个高熵的不透明 Token；哈希这一步只是
//! 固定了长度和字符集，与直接存储摘要相比并没有额外的保护。

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::random::{generate_random_bytes, hex_encode};

/// Refresh 凭证的十六进制字符长度
pub const REFRESH_SECRET_LEN: usize = 64;

/// 不透明的 Refresh 凭证
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshSecret(String);

impl RefreshSecret {
    /// 从操作系统 CSPRNG 取 `n_bytes` 个字节，对其 SHA-256 摘要做十六进制编码
    pub fn generate(n_bytes: usize) -> Result<Self> {
        let bytes = generate_random_bytes(n_bytes)?;
        Ok(Self(hex_encode(&Sha256::digest(&bytes))))
    }

    /// 接受客户端提交的凭证，格式正确时返回
    pub fn parse(s: &str) -> Option<Self> {
        Self::is_well_formed(s).then(|| Self(s.to_string()))
    }

    /// 64 个小写十六进制字符
    pub fn is_well_formed(s: &str) -> bool {
        s.len() == REFRESH_SECRET_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret([REDACTED])")
    }
}

/// 用 `n_bytes` 个随机字节生成 Refresh 凭证
///
/// # Example
///
/// ```rust
/// use swimo_auth::token::refresh::generate_refresh_secret;
///
/// let secret = generate_refresh_secret(32).unwrap();
/// assert_eq!(secret.as_str().len(), 64);
/// ```
pub fn generate_refresh_secret(n_bytes: usize) -> Result<RefreshSecret> {
    RefreshSecret::generate(n_bytes)
}
