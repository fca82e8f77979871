//! 访客登录速率限制模块
//!
//! 统计单个 User-Agent 在滑动窗口内创建的访客 Session 数。计数来源就是
//! Session 存储，进程内不保存状态，因此限制对共享同一存储的所有进程
//! 都生效。
//!
//! 限流是软性的：无法读取计数时请求会被放行，并记录一条警告。
//!
//! ## 示例
//!
//! ```rust
//! use swimo_auth::security::rate_limit::{GuestRateLimiter, RateLimitConfig};
//!
//! // 每个 User-Agent 每分钟最多 5 个访客 Session
//! let limiter = GuestRateLimiter::new(RateLimitConfig::per_minute(5));
//! assert!(limiter.is_enabled());
//! ```

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::token::SessionStore;

/// 速率限制配置
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 每个窗口允许的请求数（0 表示不限制）
    pub max_requests: u32,
    /// 滑动窗口长度
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 0,
            window: Duration::seconds(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每 60 秒 `max` 个请求
    pub fn per_minute(max: u32) -> Self {
        Self::new().with_max_requests(max)
    }

    pub fn with_max_requests(mut self, max: u32) -> Self {
        self.max_requests = max;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// 放行时的检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// 本次之后窗口内剩余的请求数
    pub remaining: u32,
    /// 配置的上限，不限制时为 0
    pub limit: u32,
    /// 窗口长度
    pub window: Duration,
    /// 未执行检查时为 false（已禁用或计数不可用）
    pub enforced: bool,
}

impl RateLimitInfo {
    pub fn allowed(remaining: u32, limit: u32, window: Duration) -> Self {
        Self {
            remaining,
            limit,
            window,
            enforced: true,
        }
    }

    /// 请求未经计数即被放行
    pub fn unenforced(limit: u32, window: Duration) -> Self {
        Self {
            remaining: limit,
            limit,
            window,
            enforced: false,
        }
    }
}

/// 按 User-Agent 限制访客 Session 的创建
#[derive(Debug, Clone, Default)]
pub struct GuestRateLimiter {
    config: RateLimitConfig,
}

impl GuestRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.max_requests > 0
    }

    /// 检查 `user_agent` 在 `now` 时刻能否再创建一个访客 Session
    ///
    /// # Errors
    ///
    /// - 计数达到或超过上限时返回 [`Error::GuestRateLimited`]
    /// - 计数过程中 `ctx` 被取消时返回 [`Error::Cancelled`]
    ///
    /// 其他计数失败只记录日志，请求会被放行。
    pub async fn check(
        &self,
        ctx: &RequestContext,
        store: &dyn SessionStore,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitInfo> {
        let limit = self.config.max_requests;
        if limit == 0 {
            return Ok(RateLimitInfo::unenforced(0, self.config.window));
        }

        let since = now - self.config.window;
        let count = match ctx
            .run(store.count_recent_guest_by_user_agent(user_agent, since))
            .await
        {
            Ok(count) => count,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(
                    error = %e,
                    user_agent,
                    "guest rate count failed, allowing sign in without enforcement"
                );
                return Ok(RateLimitInfo::unenforced(limit, self.config.window));
            }
        };

        if count >= u64::from(limit) {
            warn!(user_agent, count, limit, "guest sign in rate limited");
            return Err(Error::GuestRateLimited);
        }

        let remaining = (u64::from(limit) - count - 1) as u32;
        debug!(user_agent, count, remaining, "guest rate check passed");
        Ok(RateLimitInfo::allowed(remaining, limit, self.config.window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::token::{NewSession, Session};
    use async_trait::async_trait;

    /// 只回答访客计数的存储桩
    struct CountingStore(std::result::Result<u64, &'static str>);

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn create_user_session(&self, _: &NewSession) -> Result<String> {
            unimplemented!()
        }
        async fn create_guest_session(&self, _: &NewSession) -> Result<String> {
            unimplemented!()
        }
        async fn get_session_by_refresh_hash(&self, _: &str) -> Result<Option<Session>> {
            unimplemented!()
        }
        async fn revoke_by_id(&self, _: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn revoke_by_account_and_user_agent(&self, _: &str, _: &str) -> Result<u64> {
            unimplemented!()
        }
        async fn count_recent_guest_by_user_agent(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<u64> {
            self.0
                .map_err(|msg| Error::Storage(StorageError::OperationFailed(msg.to_string())))
        }
    }

    #[tokio::test]
    async fn test_disabled_never_counts() {
        let limiter = GuestRateLimiter::new(RateLimitConfig::per_minute(0));
        let info = limiter
            .check(&RequestContext::new(), &CountingStore(Ok(1_000)), "ua", Utc::now())
            .await
            .unwrap();
        assert!(!info.enforced);
        assert!(!limiter.is_enabled());
    }

    #[tokio::test]
    async fn test_under_limit() {
        let limiter = GuestRateLimiter::new(RateLimitConfig::per_minute(3));
        let info = limiter
            .check(&RequestContext::new(), &CountingStore(Ok(1)), "ua", Utc::now())
            .await
            .unwrap();
        assert!(info.enforced);
        assert_eq!(info.limit, 3);
        assert_eq!(info.remaining, 1);
    }

    #[tokio::test]
    async fn test_at_limit() {
        let limiter = GuestRateLimiter::new(RateLimitConfig::per_minute(3));
        let err = limiter
            .check(&RequestContext::new(), &CountingStore(Ok(3)), "ua", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GuestRateLimited));
    }

    #[tokio::test]
    async fn test_count_failure_is_soft() {
        let limiter = GuestRateLimiter::new(RateLimitConfig::per_minute(3));
        let info = limiter
            .check(
                &RequestContext::new(),
                &CountingStore(Err("connection reset")),
                "ua",
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!info.enforced);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_soft() {
        let limiter = GuestRateLimiter::new(RateLimitConfig::per_minute(3));
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = limiter
            .check(&ctx, &CountingStore(Ok(0)), "ua", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_config_builder() {
        let config = RateLimitConfig::new()
            .with_max_requests(10)
            .with_window(Duration::seconds(30));
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window, Duration::seconds(30));
        assert_eq!(RateLimitConfig::default().window, Duration::seconds(60));
    }
}
