//! 认证操作的请求与响应类型
//!
//! 字段名以 camelCase 序列化，与 JSON API 保持一致。

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

use crate::account::normalize_email;

/// 注册时允许的最短密码长度
pub const MIN_PASSWORD_LEN: usize = 8;

/// 注册请求。[`Validate::validate`] 会一次性报告所有失败字段；
/// 结果可以通过 `?` 转换为 [`Error`](crate::Error)。
#[derive(Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    #[validate(custom(function = "validate_email"))]
    pub email: String,

    #[validate(custom(function = "validate_password"))]
    pub password: String,

    #[validate(
        length(min = 1, message = "Confirm password is required"),
        must_match(other = "password", message = "Confirm passwords do not match")
    )]
    pub confirm_password: String,

    #[validate(custom(function = "validate_name"))]
    pub name: String,

    #[validate(
        required(message = "Weight is required"),
        range(exclusive_min = 0.0, message = "Weight must be greater than zero")
    )]
    pub weight: Option<f64>,

    #[validate(
        required(message = "Height is required"),
        range(exclusive_min = 0.0, message = "Height must be greater than zero")
    )]
    pub height: Option<f64>,

    #[validate(
        required(message = "Age is required"),
        range(exclusive_min = 0, message = "Age must be greater than zero")
    )]
    pub age: Option<i16>,
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("height", &self.height)
            .field("age", &self.age)
            .finish_non_exhaustive()
    }
}

/// 登录请求
///
/// [`AuthUsecase::sign_in`](super::AuthUsecase::sign_in) 不会校验它，
/// 密码错误在那里一律是 `InvalidCredentials`。这些规则供需要提前
/// 拒绝畸形输入的传输层使用。
#[derive(Clone, Default, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(custom(function = "validate_email"))]
    pub email: String,

    #[validate(custom(function = "validate_password"))]
    pub password: String,
}

impl fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// 访客提供的可选资料，原样返回
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignInGuestRequest {
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub age: Option<i16>,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Access Token、Refresh 凭证与 Access 有效期
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "token")]
    pub access_token: String,

    #[serde(rename = "refreshToken")]
    pub refresh_token: String,

    /// Access Token 过期前的毫秒数
    #[serde(rename = "expiresIn")]
    pub expires_in_ms: i64,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in_ms", &self.expires_in_ms)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignInResponse {
    pub name: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub age: Option<i16>,
    pub email: String,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestSignInResponse {
    pub name: String,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub age: Option<i16>,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

fn rule(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

/// 去除空白并转为小写后（即存储形式）的邮箱格式
fn validate_email(email: &str) -> Result<(), ValidationError> {
    if normalize_email(email).validate_email() {
        Ok(())
    } else {
        Err(rule("email", "Email is not a valid format"))
    }
}

fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(rule("required", "Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(rule(
            "length",
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(rule("required", "Name is required"));
    }
    Ok(())
}
