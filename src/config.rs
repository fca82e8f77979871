//! 认证配置模块
//!
//! [`AuthConfig`] 需要显式构建并注入到
//! [`AuthUsecase`](crate::auth::AuthUsecase) 中；库内部不会自行读取
//! 进程状态。
//!
//! ## 示例
//!
//! ```rust
//! use swimo_auth::AuthConfig;
//! use chrono::Duration;
//!
//! let config = AuthConfig::new("an-hmac-secret-that-is-at-least-32-bytes")
//!     .with_access_ttl(Duration::minutes(5))
//!     .with_guest_rate_per_minute(10);
//!
//! assert!(config.validate().is_ok());
//! ```

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, Result};

/// [`AuthConfig::from_env`] 读取的环境变量名
pub mod env {
    pub const JWT_SECRET: &str = "JWT_SECRET";
    pub const JWT_ACCESS_TTL: &str = "JWT_ACCESS_TTL";
    pub const JWT_REFRESH_TTL: &str = "JWT_REFRESH_TTL";
    pub const GUEST_ENABLED: &str = "AUTH_GUEST_ENABLED";
    pub const GUEST_RATE_PER_MINUTE: &str = "AUTH_GUEST_RATE_PER_MINUTE";
}

/// [`AuthConfig::validate`] 接受的最短签名密钥长度
pub const MIN_SECRET_LEN: usize = 32;

/// Refresh 凭证最少的随机字节数
pub const MIN_REFRESH_TOKEN_BYTES: usize = 16;

/// Access / Refresh 有效期的上限（天）
pub const MAX_TTL_DAYS: i64 = 3650;

fn max_ttl() -> Duration {
    Duration::days(MAX_TTL_DAYS)
}

/// Session 与 Token 配置
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Access Token 的 HMAC-SHA256 签名密钥
    pub jwt_secret: SecretString,

    /// Access Token 有效期
    pub access_ttl: Duration,

    /// Refresh 凭证有效期
    pub refresh_ttl: Duration,

    /// 是否允许创建匿名访客 Session
    pub guest_enabled: bool,

    /// 每个 User-Agent 每分钟允许的访客 Session 数（0 = 不限制）
    pub guest_rate_per_minute: u32,

    /// 每个 Refresh 凭证使用的随机字节数
    pub refresh_token_bytes: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::default(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            guest_enabled: true,
            guest_rate_per_minute: 0,
            refresh_token_bytes: 32,
        }
    }
}

impl AuthConfig {
    /// 使用给定签名密钥的默认配置
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: SecretString::from(jwt_secret.into()),
            ..Self::default()
        }
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    pub fn with_guest_enabled(mut self, enabled: bool) -> Self {
        self.guest_enabled = enabled;
        self
    }

    /// 设置每分钟访客上限（0 表示不限制）
    pub fn with_guest_rate_per_minute(mut self, rate: u32) -> Self {
        self.guest_rate_per_minute = rate;
        self
    }

    pub fn with_refresh_token_bytes(mut self, bytes: usize) -> Self {
        self.refresh_token_bytes = bytes;
        self
    }

    /// 从进程环境变量加载
    ///
    /// 变量名见 [`env`]，只有 `JWT_SECRET` 是必需的。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 通过任意键查找函数加载
    ///
    /// 未设置或为空的值使用默认值。返回前会先做校验。
    ///
    /// # Example
    ///
    /// ```rust
    /// use swimo_auth::AuthConfig;
    /// use chrono::Duration;
    ///
    /// let config = AuthConfig::from_lookup(|key| match key {
    ///     "JWT_SECRET" => Some("0123456789abcdef0123456789abcdef".into()),
    ///     "JWT_ACCESS_TTL" => Some("5m".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(config.access_ttl, Duration::minutes(5));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = get(env::JWT_SECRET)
            .ok_or_else(|| ConfigError::MissingRequired(env::JWT_SECRET.to_string()))?;
        let mut config = Self::new(secret);

        if let Some(raw) = get(env::JWT_ACCESS_TTL) {
            config.access_ttl = parse_duration(&raw)
                .map_err(|message| ConfigError::invalid(env::JWT_ACCESS_TTL, message))?;
        }

        if let Some(raw) = get(env::JWT_REFRESH_TTL) {
            config.refresh_ttl = parse_duration(&raw)
                .map_err(|message| ConfigError::invalid(env::JWT_REFRESH_TTL, message))?;
        }

        if let Some(raw) = get(env::GUEST_ENABLED) {
            config.guest_enabled = parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid(env::GUEST_ENABLED, "expected a boolean"))?;
        }

        if let Some(raw) = get(env::GUEST_RATE_PER_MINUTE) {
            config.guest_rate_per_minute = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(env::GUEST_RATE_PER_MINUTE, "expected a non-negative integer")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 检查会让引擎不安全或不可用的配置值
    pub fn validate(&self) -> Result<()> {
        let secret = self.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ConfigError::MissingRequired(env::JWT_SECRET.to_string()).into());
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                env::JWT_SECRET,
                format!("must be at least {} bytes", MIN_SECRET_LEN),
            )
            .into());
        }
        if self.access_ttl < Duration::zero() {
            return Err(ConfigError::invalid(env::JWT_ACCESS_TTL, "must not be negative").into());
        }
        if self.access_ttl > max_ttl() {
            return Err(ConfigError::invalid(
                env::JWT_ACCESS_TTL,
                format!("must be at most {} days", MAX_TTL_DAYS),
            )
            .into());
        }
        if self.refresh_ttl <= Duration::zero() {
            return Err(ConfigError::invalid(env::JWT_REFRESH_TTL, "must be positive").into());
        }
        if self.refresh_ttl > max_ttl() {
            return Err(ConfigError::invalid(
                env::JWT_REFRESH_TTL,
                format!("must be at most {} days", MAX_TTL_DAYS),
            )
            .into());
        }
        if self.refresh_token_bytes < MIN_REFRESH_TOKEN_BYTES {
            return Err(ConfigError::invalid(
                "refresh_token_bytes",
                format!("must be at least {}", MIN_REFRESH_TOKEN_BYTES),
            )
            .into());
        }
        Ok(())
    }
}

/// 解析 `900`、`45s`、`15m`、`720h`、`30d` 或 `1h30m` 这样的时长
///
/// 纯整数按秒处理。
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let out_of_range = || format!("duration '{}' is out of range", input);

    if let Ok(secs) = input.parse::<i64>() {
        return Duration::try_seconds(secs).ok_or_else(out_of_range);
    }

    let mut total = Duration::zero();
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: i64 = rest[..digits].parse().map_err(|_| out_of_range())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::try_milliseconds(value),
            "s" => Duration::try_seconds(value),
            "m" => Duration::try_minutes(value),
            "h" => Duration::try_hours(value),
            "d" => Duration::try_days(value),
            unit => return Err(format!("unknown duration unit '{}'", unit)),
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .ok_or_else(out_of_range)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
