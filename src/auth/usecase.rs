//! Session 生命周期编排

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use super::dto::{
    GuestSignInResponse, SignInGuestRequest, SignInRequest, SignInResponse, SignUpRequest,
    TokenPair,
};
use crate::account::{AccountStore, AccountTransaction, NewProfile, ProfileStore, normalize_email};
use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::password::{CredentialVerifier, PasswordHasher};
use crate::security::rate_limit::{GuestRateLimiter, RateLimitConfig};
use crate::token::{
    AccessClaims, AccessTokenCodec, NewSession, Principal, RefreshSecret, SessionKind,
    SessionStore, bearer_token,
};

/// 注册、登录、访客登录、退出登录与刷新
///
/// 不持有可变状态，可以通过 `Arc` 在多个请求任务之间共享。
/// 每个操作都接收调用方的 [`RequestContext`]，上下文被取消后返回
/// [`Error::Cancelled`]。
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use swimo_auth::auth::SignInGuestRequest;
/// use swimo_auth::store::InMemoryAuthStore;
/// use swimo_auth::{AuthConfig, AuthUsecase, RequestContext};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> swimo_auth::Result<()> {
/// let store = Arc::new(InMemoryAuthStore::new());
/// let config = AuthConfig::new("an-hmac-secret-that-is-at-least-32-bytes");
/// let auth = AuthUsecase::new(config, store.clone(), store.clone(), store)?;
///
/// let ctx = RequestContext::new();
/// let guest = auth
///     .sign_in_guest(&ctx, &SignInGuestRequest::default(), "Mozilla/5.0")
///     .await?;
/// let rotated = auth.refresh_token(&ctx, &guest.tokens.refresh_token).await?;
/// assert_ne!(rotated.refresh_token, guest.tokens.refresh_token);
/// # Ok(())
/// # }
/// ```
pub struct AuthUsecase {
    config: AuthConfig,
    codec: AccessTokenCodec,
    accounts: Arc<dyn AccountStore>,
    profiles: Arc<dyn ProfileStore>,
    sessions: Arc<dyn SessionStore>,
    credentials: CredentialVerifier,
    guest_limiter: GuestRateLimiter,
}

impl AuthUsecase {
    /// 使用默认密码哈希器构建
    ///
    /// # Errors
    ///
    /// `config` 未通过 [`AuthConfig::validate`] 时返回错误。
    pub fn new(
        config: AuthConfig,
        accounts: Arc<dyn AccountStore>,
        profiles: Arc<dyn ProfileStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        Self::with_hasher(config, accounts, profiles, sessions, PasswordHasher::default())
    }

    pub fn with_hasher(
        config: AuthConfig,
        accounts: Arc<dyn AccountStore>,
        profiles: Arc<dyn ProfileStore>,
        sessions: Arc<dyn SessionStore>,
        hasher: PasswordHasher,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            codec: AccessTokenCodec::from_config(&config),
            guest_limiter: GuestRateLimiter::new(RateLimitConfig::per_minute(
                config.guest_rate_per_minute,
            )),
            credentials: CredentialVerifier::new(hasher),
            config,
            accounts,
            profiles,
            sessions,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    // ========================================================================
    // 操作
    // ========================================================================

    /// 原子地创建账户及其用户资料
    ///
    /// # Errors
    ///
    /// - `Validation`：列出所有不合法的字段
    /// - `AccountExists`：邮箱已被占用
    ///
    /// 只有整个操作成功才会持久化任何数据。
    #[instrument(skip_all, fields(email = %normalize_email(&req.email)))]
    pub async fn sign_up(&self, ctx: &RequestContext, req: &SignUpRequest) -> Result<()> {
        ctx.check()?;
        if let Err(e) = req.validate() {
            let e = Error::from(e);
            warn!(error = %e, "sign up rejected by validation");
            return Err(e);
        }

        let email = normalize_email(&req.email);
        let password_hash = ctx
            .run(self.credentials.hasher().hash_blocking(&req.password))
            .await?;

        let mut tx = ctx.run(self.accounts.begin()).await.inspect_err(log_failure)?;

        let account_id = match self
            .insert_account(ctx, tx.as_mut(), &email, &password_hash, req)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "sign up failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "sign up rollback failed");
                }
                return Err(e);
            }
        };

        match ctx.run(tx.commit()).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                error!(error = %e, "sign up commit failed");
                return Err(Error::internal("sign up could not be completed"));
            }
        }

        info!(account_id = %account_id, "account created");
        Ok(())
    }

    /// 用邮箱和密码认证，并为当前设备开启一个 Session
    ///
    /// 同一账户在同一 User-Agent 上之前仍可刷新的 Session 会先被撤销。
    ///
    /// 锁定标记在密码之前检查，因此被锁定的账户对任何密码都返回
    /// `AccountLocked`。
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials`：邮箱不存在或密码错误
    /// - `AccountLocked`：账户已被锁定
    #[instrument(skip_all, fields(email = %normalize_email(&req.email), user_agent = %user_agent))]
    pub async fn sign_in(
        &self,
        ctx: &RequestContext,
        req: &SignInRequest,
        user_agent: &str,
    ) -> Result<SignInResponse> {
        ctx.check()?;
        let email = normalize_email(&req.email);

        let auth = ctx
            .run(self.accounts.get_auth_by_email(&email))
            .await
            .inspect_err(log_failure)?;

        let Some(auth) = auth else {
            ctx.run(async {
                self.credentials.burn(&req.password).await;
                Ok(())
            })
            .await?;
            warn!("sign in attempt for unknown email");
            return Err(Error::InvalidCredentials);
        };

        if auth.is_locked {
            warn!(account_id = %auth.account_id, "sign in attempt for locked account");
            return Err(Error::AccountLocked);
        }

        if let Err(e) = ctx
            .run(self.credentials.compare(&auth.password_hash, &req.password))
            .await
        {
            if matches!(e, Error::InvalidCredentials) {
                warn!(account_id = %auth.account_id, "sign in attempt with wrong password");
            }
            return Err(e);
        }

        let revoked = ctx
            .run(
                self.sessions
                    .revoke_by_account_and_user_agent(&auth.account_id, user_agent),
            )
            .await
            .inspect_err(log_failure)?;
        if revoked > 0 {
            debug!(account_id = %auth.account_id, revoked, "revoked previous device session");
        }

        let tokens = self
            .mint(ctx, SessionKind::User, user_agent, Some(&auth.account_id))
            .await?;

        Ok(SignInResponse {
            name: auth.name,
            weight: auth.weight_kg,
            height: auth.height_cm,
            age: auth.age_years,
            email: auth.email,
            tokens,
        })
    }

    /// 开启一个匿名 Session
    ///
    /// # Errors
    ///
    /// - `GuestDisabled`：访客登录已关闭
    /// - `GuestRateLimited`：该 User-Agent 达到了每分钟上限
    #[instrument(skip_all, fields(user_agent = %user_agent))]
    pub async fn sign_in_guest(
        &self,
        ctx: &RequestContext,
        hint: &SignInGuestRequest,
        user_agent: &str,
    ) -> Result<GuestSignInResponse> {
        ctx.check()?;

        if !self.config.guest_enabled {
            warn!("guest sign in attempted while disabled");
            return Err(Error::GuestDisabled);
        }

        self.guest_limiter
            .check(ctx, self.sessions.as_ref(), user_agent, Utc::now())
            .await?;

        let tokens = self.mint(ctx, SessionKind::Guest, user_agent, None).await?;

        Ok(GuestSignInResponse {
            name: "Guest".to_string(),
            weight: hint.weight,
            height: hint.height,
            age: hint.age,
            tokens,
        })
    }

    /// 撤销 Session。未知或已撤销的 Session 不视为错误。
    #[instrument(skip(self, ctx))]
    pub async fn sign_out(&self, ctx: &RequestContext, session_id: &str) -> Result<()> {
        let revoked = ctx
            .run(self.sessions.revoke_by_id(session_id))
            .await
            .inspect_err(log_failure)?;

        if revoked {
            info!("session revoked");
        } else {
            debug!("session already revoked or unknown");
        }
        Ok(())
    }

    /// 用 Refresh 凭证换取新的 Session 和 Token 对
    ///
    /// 提交的凭证会被消耗：第二次使用会失败。
    ///
    /// # Errors
    ///
    /// 凭证不存在、已过期、已撤销、已使用或格式错误时，一律返回
    /// `ExpiredRefreshToken`。
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, ctx: &RequestContext, credential: &str) -> Result<TokenPair> {
        ctx.check()?;

        let Some(secret) = RefreshSecret::parse(credential.trim()) else {
            warn!("malformed refresh credential");
            return Err(Error::ExpiredRefreshToken);
        };

        let session = ctx
            .run(self.sessions.claim_session_by_refresh_hash(secret.as_str()))
            .await
            .inspect_err(log_failure)?;

        let Some(session) = session else {
            warn!("refresh credential not found, expired or revoked");
            return Err(Error::ExpiredRefreshToken);
        };

        debug!(session_id = %session.id, kind = %session.kind, "refresh credential consumed");
        self.mint(
            ctx,
            session.kind,
            &session.user_agent,
            session.account_id.as_deref(),
        )
        .await
    }

    /// 验证 `Authorization` 头中的 Access Token
    ///
    /// 纯函数：不访问存储，因此已撤销 Session 的 Access Token 在过期前
    /// 仍然有效。
    pub fn authenticate(&self, authorization: &str) -> Result<AccessClaims> {
        let token = bearer_token(authorization)?;
        self.codec.verify(token)
    }

    // ========================================================================
    // 辅助函数
    // ========================================================================

    async fn insert_account(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn AccountTransaction,
        email: &str,
        password_hash: &str,
        req: &SignUpRequest,
    ) -> Result<String> {
        let account_id = ctx.run(tx.create_account(email, password_hash)).await?;

        let profile = NewProfile {
            account_id: account_id.clone(),
            name: req.name.trim().to_string(),
            weight_kg: req.weight,
            height_cm: req.height,
            age_years: req.age,
        };
        ctx.run(tx.create_profile(&profile)).await?;

        Ok(account_id)
    }

    /// 持久化新的 Session 并签发其 Access Token
    async fn mint(
        &self,
        ctx: &RequestContext,
        kind: SessionKind,
        user_agent: &str,
        account_id: Option<&str>,
    ) -> Result<TokenPair> {
        let now = Utc::now();
        let account_id = account_id.filter(|_| kind == SessionKind::User);
        let refresh = RefreshSecret::generate(self.config.refresh_token_bytes)?;
        let new_session = NewSession::new(
            kind,
            account_id.map(str::to_string),
            user_agent,
            &refresh,
            &self.config,
            now,
        )?;

        let (session_id, principal) = match account_id {
            Some(account_id) => {
                let user_id = ctx
                    .run(self.profiles.get_profile_id_by_account_id(account_id))
                    .await
                    .inspect_err(log_failure)?
                    .ok_or_else(|| {
                        error!(account_id, "account has no profile");
                        Error::internal("account has no profile")
                    })?;

                let session_id = ctx
                    .run(self.sessions.create_user_session(&new_session))
                    .await
                    .inspect_err(log_failure)?;

                (session_id, Principal::user(account_id, user_id))
            }
            None => {
                let session_id = ctx
                    .run(self.sessions.create_guest_session(&new_session))
                    .await
                    .inspect_err(log_failure)?;

                (session_id, Principal::Guest)
            }
        };

        let issued = self.codec.issue_at(&session_id, &principal, now)?;
        info!(
            session_id = %session_id,
            kind = %principal.kind(),
            account_id = principal.account_id().unwrap_or_default(),
            "session created"
        );

        let expires_in_ms = issued.expires_in_ms(Utc::now());
        Ok(TokenPair {
            access_token: issued.token,
            refresh_token: refresh.into_string(),
            expires_in_ms,
        })
    }
}

fn log_failure(e: &Error) {
    if e.is_internal() {
        error!(error = %e, "persistence failure");
    }
}
