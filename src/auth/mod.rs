//! 认证操作模块
//!
//! [`AuthUsecase`] 把账户、用户资料和 Session 存储与密码哈希器、
//! Access Token 编解码器以及访客限流器组合在一起。
//! [`dto`] 中的请求与响应类型使用 HTTP API 的 JSON 字段名。

pub mod dto;
mod usecase;

pub use dto::{
    GuestSignInResponse, MIN_PASSWORD_LEN, RefreshTokenRequest, SignInGuestRequest,
    SignInRequest, SignInResponse, SignUpRequest, TokenPair,
};
pub use usecase::AuthUsecase;
