//! 统一错误类型模块
//!
//! 业务规则拒绝（`InvalidCredentials`、`AccountLocked`、
//! `AccountExists`、`GuestDisabled`、`GuestRateLimited`、
//! `ExpiredRefreshToken`）是扁平的变体，调用方可以直接映射为面向用户的
//! 响应。其余错误按类别分组，并由 [`Error::is_internal`] 视为内部错误。

use std::collections::BTreeMap;
use std::fmt;

/// 库的 Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Access Token 验证失败
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// 邮箱不存在或密码错误，两者永远不做区分
    #[error("invalid email or password")]
    InvalidCredentials,

    /// 账户存在但已被锁定
    #[error("account locked")]
    AccountLocked,

    /// 注册时触发邮箱唯一约束
    #[error("account already exists")]
    AccountExists,

    /// 访客登录已关闭
    #[error("guest sign in disabled")]
    GuestDisabled,

    /// 同一 User-Agent 在窗口期内创建的访客 Session 过多
    #[error("guest sign in rate limited")]
    GuestRateLimited,

    /// Refresh 凭证不存在、已过期或已被撤销
    #[error("expired refresh token")]
    ExpiredRefreshToken,

    /// 请求验证失败
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// 密码哈希失败
    #[error("Password hash error: {0}")]
    PasswordHash(#[from] PasswordHashError),

    /// 存储失败
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// 随机数或密钥错误
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 调用方取消了操作或截止时间已过
    #[error("operation cancelled")]
    Cancelled,

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 创建内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建自由格式的验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::Custom(msg.into()))
    }

    /// 此错误对应的稳定错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Token(_) | Error::InvalidCredentials | Error::ExpiredRefreshToken => {
                ErrorCode::Unauthorized
            }
            Error::AccountLocked => ErrorCode::Locked,
            Error::AccountExists => ErrorCode::Conflict,
            Error::GuestDisabled => ErrorCode::Forbidden,
            Error::GuestRateLimited => ErrorCode::RateLimitExceeded,
            Error::Validation(_) => ErrorCode::ValidationError,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::PasswordHash(_)
            | Error::Storage(_)
            | Error::Crypto(_)
            | Error::Config(_)
            | Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// 错误详情是否不能离开当前进程
    pub fn is_internal(&self) -> bool {
        self.code() == ErrorCode::InternalError
    }

    /// 可以安全展示给终端用户的文本
    pub fn public_message(&self) -> String {
        match self {
            Error::Token(_) => "Invalid or expired token".to_string(),
            Error::InvalidCredentials => "Invalid email or password".to_string(),
            Error::AccountLocked => "Account is locked".to_string(),
            Error::AccountExists => "Email already exists".to_string(),
            Error::GuestDisabled => "Guest sign-in is currently disabled".to_string(),
            Error::GuestRateLimited => "Guest session limit reached".to_string(),
            Error::ExpiredRefreshToken => "Refresh token is expired or invalid".to_string(),
            Error::Validation(e) => e.to_string(),
            Error::Cancelled => "Request cancelled".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// 传输层使用的稳定错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    Conflict,
    Locked,
    RateLimitExceeded,
    ValidationError,
    Cancelled,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Locked => "LOCKED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// 此错误码惯用的 HTTP 状态码
    ///
    /// `Cancelled` 使用 499（client closed request）。
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::Conflict => 409,
            ErrorCode::Locked => 423,
            ErrorCode::RateLimitExceeded => 429,
            ErrorCode::ValidationError => 422,
            ErrorCode::Cancelled => 499,
            ErrorCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access Token 错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// 结构或载荷格式错误
    #[error("invalid token format: {0}")]
    InvalidFormat(String),
    /// 签名不匹配
    #[error("invalid token signature")]
    InvalidSignature,
    /// 已过期
    #[error("token has expired")]
    Expired,
    /// Claims 序列化失败
    #[error("token encoding failed: {0}")]
    EncodingFailed(String),
}

/// 字段名到错误消息的映射，按字段名排序以保证输出稳定
pub type FieldErrors = BTreeMap<String, String>;

/// 请求验证错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// 每个失败字段一条消息
    #[error("validation failed: {}", format_fields(.0))]
    Fields(FieldErrors),
    /// 自由格式的验证消息
    #[error("{0}")]
    Custom(String),
}

impl ValidationError {
    /// 字段错误，`Custom` 时为 `None`
    pub fn fields(&self) -> Option<&FieldErrors> {
        match self {
            ValidationError::Fields(fields) => Some(fields),
            ValidationError::Custom(_) => None,
        }
    }
}

impl From<validator::ValidationErrors> for ValidationError {
    /// 每个字段只保留第一条消息，键为 camelCase 的 JSON 字段名
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .filter_map(|(field, errors)| {
                let first = errors.first()?;
                let message = first
                    .message
                    .as_ref()
                    .map_or_else(|| first.code.to_string(), |m| m.to_string());
                Some((camel_case(&field), message))
            })
            .collect();
        ValidationError::Fields(fields)
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(errors.into())
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn format_fields(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(field, msg)| format!("{}: {}", field, msg))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 密码哈希错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordHashError {
    /// 哈希生成失败
    #[error("hash generation failed: {0}")]
    HashFailed(String),
    /// 存储的哈希格式无法识别
    #[error("invalid hash format: {0}")]
    InvalidFormat(String),
    /// 算法未编译进来
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 后端不可达
    #[error("storage connection failed: {0}")]
    ConnectionFailed(String),
    /// 需要的记录不存在
    #[error("not found: {0}")]
    NotFound(String),
    /// 插入被约束拒绝
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// 事务提交失败
    #[error("commit failed: {0}")]
    CommitFailed(String),
    /// 通用操作失败
    #[error("storage operation failed: {0}")]
    OperationFailed(String),
    /// 数据库驱动错误
    #[cfg(feature = "postgres")]
    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },
}

/// 随机数与密钥错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// 操作系统随机源失败
    #[error("random number generation failed: {0}")]
    RngFailed(String),
    /// MAC 拒绝了密钥
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// 缺少必需的配置项
    #[error("missing required configuration: {0}")]
    MissingRequired(String),
    /// 配置项存在但不可用
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}
