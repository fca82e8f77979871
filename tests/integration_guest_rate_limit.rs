//! 集成测试：访客登录限流
//!
//! 按 User-Agent 的上限通过 Session 存储计数。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use swimo_auth::auth::SignInGuestRequest;
use swimo_auth::error::StorageError;
use swimo_auth::store::InMemoryAuthStore;
use swimo_auth::token::{NewSession, Session, SessionStore};
use swimo_auth::{AuthConfig, AuthUsecase, Error, ErrorCode, RequestContext, Result};

const SECRET: &str = "integration-test-secret-at-least-32-bytes";

fn usecase(config: AuthConfig, sessions: Arc<dyn SessionStore>) -> AuthUsecase {
    let store = Arc::new(InMemoryAuthStore::new());
    AuthUsecase::new(config, store.clone(), store, sessions).unwrap()
}

async fn guest(auth: &AuthUsecase, user_agent: &str) -> Result<()> {
    auth.sign_in_guest(
        &RequestContext::new(),
        &SignInGuestRequest::default(),
        user_agent,
    )
    .await
    .map(|_| ())
}

/// 每分钟上限为 3：同一 User-Agent 的第四次失败，其他 User-Agent 不受影响
#[tokio::test]
async fn test_ceiling_per_user_agent() {
    let store = Arc::new(InMemoryAuthStore::new());
    let auth = usecase(
        AuthConfig::new(SECRET).with_guest_rate_per_minute(3),
        store.clone(),
    );

    for _ in 0..3 {
        guest(&auth, "X").await.unwrap();
    }

    let err = guest(&auth, "X").await.unwrap_err();
    assert!(matches!(err, Error::GuestRateLimited));
    assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
    assert_eq!(err.code().http_status(), 429);

    guest(&auth, "Y").await.unwrap();
    assert_eq!(store.sessions_for_user_agent("X").unwrap().len(), 3);
}

/// 撤销访客 Session 不会释放窗口配额
#[tokio::test]
async fn test_revoked_sessions_still_count() {
    let store = Arc::new(InMemoryAuthStore::new());
    let auth = usecase(
        AuthConfig::new(SECRET).with_guest_rate_per_minute(2),
        store.clone(),
    );

    for _ in 0..2 {
        guest(&auth, "X").await.unwrap();
    }
    for session in store.sessions_for_user_agent("X").unwrap() {
        auth.sign_out(&RequestContext::new(), &session.id).await.unwrap();
    }

    assert!(matches!(
        guest(&auth, "X").await,
        Err(Error::GuestRateLimited)
    ));
}

#[tokio::test]
async fn test_zero_means_unlimited() {
    let auth = usecase(AuthConfig::new(SECRET), Arc::new(InMemoryAuthStore::new()));
    for _ in 0..10 {
        guest(&auth, "X").await.unwrap();
    }
}

#[tokio::test]
async fn test_disabled_takes_precedence() {
    let auth = usecase(
        AuthConfig::new(SECRET)
            .with_guest_enabled(false)
            .with_guest_rate_per_minute(3),
        Arc::new(InMemoryAuthStore::new()),
    );

    let err = guest(&auth, "X").await.unwrap_err();
    assert!(matches!(err, Error::GuestDisabled));
    assert_eq!(err.code().http_status(), 403);
}

/// 访客计数总是失败的 Session 存储
struct UncountableStore(InMemoryAuthStore);

#[async_trait]
impl SessionStore for UncountableStore {
    async fn create_user_session(&self, session: &NewSession) -> Result<String> {
        self.0.create_user_session(session).await
    }

    async fn create_guest_session(&self, session: &NewSession) -> Result<String> {
        self.0.create_guest_session(session).await
    }

    async fn get_session_by_refresh_hash(&self, hash: &str) -> Result<Option<Session>> {
        self.0.get_session_by_refresh_hash(hash).await
    }

    async fn revoke_by_id(&self, session_id: &str) -> Result<bool> {
        self.0.revoke_by_id(session_id).await
    }

    async fn revoke_by_account_and_user_agent(
        &self,
        account_id: &str,
        user_agent: &str,
    ) -> Result<u64> {
        self.0
            .revoke_by_account_and_user_agent(account_id, user_agent)
            .await
    }

    async fn count_recent_guest_by_user_agent(
        &self,
        _: &str,
        _: DateTime<Utc>,
    ) -> Result<u64> {
        Err(Error::Storage(StorageError::ConnectionFailed(
            "connection refused".into(),
        )))
    }
}

/// 计数失败时请求被放行
#[tokio::test]
async fn test_count_failure_is_soft() {
    let store = Arc::new(UncountableStore(InMemoryAuthStore::new()));
    let auth = usecase(
        AuthConfig::new(SECRET).with_guest_rate_per_minute(1),
        store.clone(),
    );

    for _ in 0..3 {
        guest(&auth, "X").await.unwrap();
    }
    assert_eq!(store.0.sessions_for_user_agent("X").unwrap().len(), 3);
}
