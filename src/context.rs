//! 请求级取消与截止时间模块
//!
//! 每个 [`AuthUsecase`](crate::auth::AuthUsecase) 操作都接收一个
//! [`RequestContext`]。存储调用会与上下文竞争执行，调用方放弃请求
//! （客户端断开、超时）后，操作会在下一个 await 点停止，并返回
//! [`Error::Cancelled`] 而不是业务错误。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// 单个入站请求的取消信号与可选截止时间
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// 除非调用 [`cancel`](Self::cancel)，否则永不取消的上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定到已有的 token，例如服务器持有的 token
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// 从现在起经过 `timeout` 后取消
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 在 `deadline` 时取消；已有的更早截止时间会被保留
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// 与当前上下文一同取消的子上下文
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 已取消或已超过截止时间时返回 true
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 上下文已结束时立即返回 [`Error::Cancelled`]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// 驱动 `fut` 直到完成，除非上下文先被取消
    ///
    /// 同时就绪时取消优先，因此调用前已取消的上下文永远不会 poll
    /// `fut`。
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = deadline => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_through() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok::<_, Error>(42) }).await.unwrap();
        assert_eq!(value, 42);

        let err = ctx
            .run(async { Err::<(), _>(Error::AccountExists) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccountExists));
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let ctx = RequestContext::new();
        ctx.cancel();

        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));

        let err = ctx.run(async { Ok::<_, Error>(()) }).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_run() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_cancelled());

        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = RequestContext::new()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
