//! 安全防护模块
//!
//! - **rate_limit**: 按 User-Agent 限制访客登录次数

pub mod rate_limit;

pub use rate_limit::{GuestRateLimiter, RateLimitConfig, RateLimitInfo};
