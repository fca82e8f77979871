//! Access Token 编解码模块
//!
//! Access Token 是紧凑格式的 HS256 JWT：
//! `base64url(header).base64url(claims).base64url(signature)`，不带填充。
//! Header 固定为 `{"alg":"HS256","typ":"JWT"}`，Claims 为
//! `{sub, aid?, uid?, kind, iat, exp}`，时间戳单位为 Unix 秒。
//!
//! Token 是无状态的。验证依次检查结构、签名、载荷和过期时间，
//! 不访问任何存储；撤销只作用于 Refresh 凭证。
//!
//! ## 示例
//!
//! ```rust
//! use swimo_auth::token::jwt::{issue_access_token, verify_access_token, Principal};
//! use chrono::Duration;
//!
//! let secret = b"an-hmac-secret-that-is-at-least-32-bytes";
//! let issued = issue_access_token(secret, Duration::minutes(15), "session-1", &Principal::Guest).unwrap();
//!
//! let claims = verify_access_token(&issued.token, secret).unwrap();
//! assert_eq!(claims.sub, "session-1");
//! assert!(claims.aid.is_none());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::session::SessionKind;
use crate::config::AuthConfig;
use crate::error::{CryptoError, Error, Result, TokenError};
use crate::random::constant_time_compare_str;

type HmacSha256 = Hmac<Sha256>;

/// 固定的 JOSE Header
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

// ============================================================================
// Claims
// ============================================================================

/// Token 所代表的主体
///
/// 访客不携带任何标识；用户总是同时携带账户 ID 和用户资料 ID。
/// 从 `Principal` 构建 Claims 可以在构造时保证 kind 与标识一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Guest,
    User { account_id: String, user_id: String },
}

impl Principal {
    pub fn user(account_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Principal::User {
            account_id: account_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            Principal::Guest => SessionKind::Guest,
            Principal::User { .. } => SessionKind::User,
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            Principal::Guest => None,
            Principal::User { account_id, .. } => Some(account_id),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::Guest => None,
            Principal::User { user_id, .. } => Some(user_id),
        }
    }
}

/// Access Token 携带的 Claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Session ID
    pub sub: String,

    /// 账户 ID，仅用户
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aid: Option<String>,

    /// 用户资料 ID，仅用户
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    pub kind: SessionKind,

    /// 签发时间，Unix 秒
    pub iat: i64,

    /// 过期时间，Unix 秒
    pub exp: i64,
}

impl AccessClaims {
    fn new(session_id: &str, principal: &Principal, iat: i64, exp: i64) -> Self {
        Self {
            sub: session_id.to_string(),
            aid: principal.account_id().map(str::to_string),
            uid: principal.user_id().map(str::to_string),
            kind: principal.kind(),
            iat,
            exp,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.sub
    }

    /// 还原主体，kind 与标识不一致时返回 `None`
    pub fn principal(&self) -> Option<Principal> {
        match (self.kind, &self.aid, &self.uid) {
            (SessionKind::Guest, None, None) => Some(Principal::Guest),
            (SessionKind::User, Some(aid), Some(uid)) => Some(Principal::user(aid, uid)),
            _ => None,
        }
    }

    /// 访客不携带任何标识，用户两者都携带
    pub fn is_consistent(&self) -> bool {
        self.principal().is_some()
    }

    /// 从 `exp` 这一秒起 Token 即视为过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// 新签发的 Access Token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// 距离过期的剩余毫秒数，不会为负
    pub fn expires_in_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds().max(0)
    }
}

// ============================================================================
// 编解码原语
// ============================================================================

/// 为 `session_id` 签发一个从现在起 `ttl` 内有效的 Access Token
///
/// # Arguments
///
/// * `secret` - HMAC-SHA256 密钥
/// * `ttl` - Token 有效期；为 0 时签发的 Token 已经过期
/// * `session_id` - 作为 `sub` Claim
/// * `principal` - 决定 `kind`、`aid` 和 `uid`
pub fn issue_access_token(
    secret: &[u8],
    ttl: Duration,
    session_id: &str,
    principal: &Principal,
) -> Result<IssuedToken> {
    issue_access_token_at(secret, ttl, session_id, principal, Utc::now())
}

/// 与 [`issue_access_token`] 相同，但显式指定签发时间
///
/// 相同输入的输出是确定的。过期时间超出可表示范围时返回内部错误。
pub fn issue_access_token_at(
    secret: &[u8],
    ttl: Duration,
    session_id: &str,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<IssuedToken> {
    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or_else(|| Error::internal("access token expiry out of range"))?;
    let claims = AccessClaims::new(session_id, principal, now.timestamp(), expires_at.timestamp());

    let payload = serde_json::to_vec(&claims)
        .map_err(|e| Error::Token(TokenError::EncodingFailed(e.to_string())))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(HEADER_JSON),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = sign(secret, &signing_input)?;

    Ok(IssuedToken {
        token: format!("{}.{}", signing_input, signature),
        expires_at,
    })
}

/// 在当前时间用 `secret` 验证 Token
pub fn verify_access_token(token: &str, secret: &[u8]) -> Result<AccessClaims> {
    verify_access_token_at(token, secret, Utc::now())
}

/// 在 `now` 时刻用 `secret` 验证 Token
///
/// 失败顺序：结构错误 → `InvalidFormat`，签名不匹配 →
/// `InvalidSignature`，载荷无法解码或不一致 → `InvalidFormat`，
/// 已过期 → `Expired`。
pub fn verify_access_token_at(
    token: &str,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<AccessClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = parts.as_slice() else {
        return Err(invalid("token must have three segments"));
    };

    let expected = sign(secret, &format!("{}.{}", header, payload))?;
    if !constant_time_compare_str(&expected, signature) {
        return Err(Error::Token(TokenError::InvalidSignature));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| invalid("payload is not base64url"))?;
    let claims: AccessClaims =
        serde_json::from_slice(&payload).map_err(|_| invalid("payload is not a claim set"))?;

    if claims.sub.is_empty() {
        return Err(invalid("missing subject"));
    }
    if !claims.is_consistent() {
        return Err(invalid("claims do not match token kind"));
    }
    if claims.is_expired_at(now) {
        return Err(Error::Token(TokenError::Expired));
    }

    Ok(claims)
}

/// 从 `Authorization: Bearer <token>` 头中提取 Token
///
/// scheme 不区分大小写。
pub fn bearer_token(header: &str) -> Result<&str> {
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| invalid("invalid authorization format"))?;

    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(invalid("invalid authorization format"));
    }
    Ok(token)
}

fn sign(secret: &[u8], data: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Crypto(CryptoError::InvalidKey(e.to_string())))?;
    mac.update(data.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn invalid(msg: &str) -> Error {
    Error::Token(TokenError::InvalidFormat(msg.to_string()))
}

// ============================================================================
// 绑定配置的编解码器
// ============================================================================

/// 签名密钥与 Access TTL
#[derive(Debug, Clone)]
pub struct AccessTokenCodec {
    secret: SecretString,
    ttl: Duration,
}

impl AccessTokenCodec {
    pub fn new(secret: SecretString, ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.clone(), config.access_ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, session_id: &str, principal: &Principal) -> Result<IssuedToken> {
        self.issue_at(session_id, principal, Utc::now())
    }

    pub fn issue_at(
        &self,
        session_id: &str,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        issue_access_token_at(self.key(), self.ttl, session_id, principal, now)
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        verify_access_token(token, self.key())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims> {
        verify_access_token_at(token, self.key(), now)
    }

    fn key(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-at-least-32-bytes!!";

    fn user() -> Principal {
        Principal::user("acc-1", "usr-1")
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_issue_and_verify_user() {
        let now = fixed_now();
        let issued =
            issue_access_token_at(SECRET, Duration::minutes(15), "sess-1", &user(), now).unwrap();
        let claims = verify_access_token_at(&issued.token, SECRET, now).unwrap();

        assert_eq!(claims.sub, "sess-1");
        assert_eq!(claims.aid.as_deref(), Some("acc-1"));
        assert_eq!(claims.uid.as_deref(), Some("usr-1"));
        assert_eq!(claims.kind, SessionKind::User);
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.exp, now.timestamp() + 900);
        assert_eq!(claims.principal(), Some(user()));
        assert_eq!(issued.expires_at, now + Duration::minutes(15));
    }

    #[test]
    fn test_token_shape() {
        let issued =
            issue_access_token_at(SECRET, Duration::minutes(1), "s", &Principal::Guest, fixed_now())
                .unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();

        assert_eq!(parts.len(), 3);
        assert!(!issued.token.contains('='));
        assert_eq!(
            URL_SAFE_NO_PAD.decode(parts[0]).unwrap(),
            HEADER_JSON.as_bytes()
        );

        // 访客载荷完全省略标识
        let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert!(!payload.contains("aid"));
        assert!(!payload.contains("uid"));
        assert!(payload.contains(r#""kind":"guest""#));
    }

    #[test]
    fn test_issue_is_deterministic() {
        let a = issue_access_token_at(SECRET, Duration::minutes(1), "s", &user(), fixed_now()).unwrap();
        let b = issue_access_token_at(SECRET, Duration::minutes(1), "s", &user(), fixed_now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_secret() {
        let issued = issue_access_token(SECRET, Duration::minutes(1), "s", &user()).unwrap();
        let err = verify_access_token(&issued.token, b"another-secret-key-at-least-32-bytes").unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::InvalidSignature)));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "abc", "a.b", "a.b.c.d"] {
            let err = verify_access_token(token, SECRET).unwrap_err();
            assert!(
                matches!(err, Error::Token(TokenError::InvalidFormat(_))),
                "token {:?} gave {:?}",
                token,
                err
            );
        }
    }

    #[test]
    fn test_signed_garbage_payload() {
        // 签名正确，但载荷不是 Claims
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER_JSON),
            URL_SAFE_NO_PAD.encode(b"not json")
        );
        let token = format!("{}.{}", input, sign(SECRET, &input).unwrap());

        let err = verify_access_token(&token, SECRET).unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::InvalidFormat(_))));
    }

    fn signed(claims: serde_json::Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER_JSON),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        format!("{}.{}", input, sign(SECRET, &input).unwrap())
    }

    #[test]
    fn test_empty_subject_rejected() {
        let token = signed(serde_json::json!({
            "sub": "", "kind": "guest", "iat": 0, "exp": i64::MAX
        }));
        let err = verify_access_token(&token, SECRET).unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::InvalidFormat(_))));
    }

    #[test]
    fn test_inconsistent_kind_rejected() {
        let guest_with_ids = signed(serde_json::json!({
            "sub": "s", "aid": "a", "uid": "u", "kind": "guest", "iat": 0, "exp": i64::MAX
        }));
        let user_without_uid = signed(serde_json::json!({
            "sub": "s", "aid": "a", "kind": "user", "iat": 0, "exp": i64::MAX
        }));

        for token in [guest_with_ids, user_without_uid] {
            let err = verify_access_token(&token, SECRET).unwrap_err();
            assert!(matches!(err, Error::Token(TokenError::InvalidFormat(_))));
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = fixed_now();
        let issued =
            issue_access_token_at(SECRET, Duration::seconds(10), "s", &Principal::Guest, now).unwrap();
        let exp = now + Duration::seconds(10);

        // exp = now + 1
        assert!(verify_access_token_at(&issued.token, SECRET, exp - Duration::seconds(1)).is_ok());
        // exp = now
        assert!(matches!(
            verify_access_token_at(&issued.token, SECRET, exp),
            Err(Error::Token(TokenError::Expired))
        ));
        // exp = now - 1
        assert!(matches!(
            verify_access_token_at(&issued.token, SECRET, exp + Duration::seconds(1)),
            Err(Error::Token(TokenError::Expired))
        ));
    }

    #[test]
    fn test_zero_ttl_is_expired() {
        let issued = issue_access_token(SECRET, Duration::zero(), "s", &Principal::Guest).unwrap();
        let err = verify_access_token(&issued.token, SECRET).unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::Expired)));
    }

    #[test]
    fn test_expiry_out_of_range() {
        let err = issue_access_token_at(
            SECRET,
            Duration::days(100_000_000_000),
            "s",
            &Principal::Guest,
            fixed_now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_signature_checked_before_expiry() {
        let now = fixed_now();
        let issued =
            issue_access_token_at(SECRET, Duration::zero(), "s", &Principal::Guest, now).unwrap();
        let err = verify_access_token_at(&issued.token, b"wrong-secret-key-at-least-32-bytes!", now)
            .unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::InvalidSignature)));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token("bearer abc").unwrap(), "abc");
        assert_eq!(bearer_token("BEARER   abc ").unwrap(), "abc");

        for header in ["", "Bearer", "Bearer ", "Basic abc", "abc.def.ghi"] {
            assert!(bearer_token(header).is_err(), "header {:?}", header);
        }
    }

    #[test]
    fn test_codec_from_config() {
        let config = AuthConfig::new("an-hmac-secret-that-is-at-least-32-bytes")
            .with_access_ttl(Duration::minutes(5));
        let codec = AccessTokenCodec::from_config(&config);
        assert_eq!(codec.ttl(), Duration::minutes(5));

        let now = Utc::now();
        let issued = codec.issue_at("sess", &user(), now).unwrap();
        assert_eq!(issued.expires_in_ms(now), 5 * 60 * 1000);

        let claims = codec.verify(&issued.token).unwrap();
        assert_eq!(claims.session_id(), "sess");
        assert_eq!(claims.expires_at().map(|t| t.timestamp()), Some(claims.exp));
    }
}
