//
// `/token` (§4.4) — one grant-typed multiplexer per RFC 6749 §4, plus
// the device-code grant (RFC 8628 §3.4).
//
// Every function here returns `OAuthError`, not `crate::error::Error`:
// the token endpoint's error vocabulary (`invalid_grant`,
// `unsupported_grant_type`, `authorization_pending`, ...) is fixed by
// RFC 6749/8628 and doesn't line up with the crate-wide `ErrorKind` the
// rest of the gateway uses, so it gets its own small type here instead
// of stretching `ErrorKind` to cover a protocol it wasn't designed for.
//
use chrono::{Duration, Utc};
use serde::Serialize;

use super::{authenticate_client, issuer, resolve_client, split_scopes};
use crate::auth::{self, IdTokenClaims, OidcAccessClaims};
use crate::blacklist;
use crate::crypto;
use crate::db::models::{AuthorizationCode, DeviceCode, DeviceCodeStatus, OAuthClient, RefreshToken, Role, User};
use crate::db::DbConn;
use crate::error::Error;
use crate::redis_store::RedisStore;
use crate::util::get_uuid;
use crate::CONFIG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    AuthorizationPending,
    SlowDown,
    AccessDenied,
    ExpiredToken,
}

impl OAuthErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::AccessDenied => "access_denied",
            Self::ExpiredToken => "expired_token",
        }
    }
}

/// The RFC 6749 §5.2 error body. `client_id`/`invalid_client` map to
/// HTTP 401, everything else to HTTP 400 — left to the API layer, which
/// owns the HTTP framework.
#[derive(Debug, Serialize)]
pub struct OAuthError {
    pub error: &'static str,
    pub error_description: String,
}

impl OAuthError {
    pub fn new(code: OAuthErrorCode, description: impl Into<String>) -> Self {
        Self { error: code.as_str(), error_description: description.into() }
    }
}

/// An internal (DB/crypto) failure surfaces as `invalid_grant` at the
/// protocol boundary — the RFC has no "internal error" code, and this
/// endpoint never leaks storage detail to the client.
impl From<Error> for OAuthError {
    fn from(e: Error) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, e.client_message())
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Single minting point shared by every grant below: issues an access
/// token, an id_token when `openid` was granted, and a refresh token
/// when the caller asks for one. Mirrors `state_machine::issue_token_pair`'s
/// one-call-does-everything shape for the internal token family.
async fn mint(user: &User, client: &OAuthClient, scope: &str, nonce: Option<&str>, with_refresh: bool, conn: &DbConn) -> Result<TokenResponse, Error> {
    let scopes = split_scopes(scope);
    let roles = Role::names_for_user(&user.id, conn).await?;
    let now = Utc::now();

    let access_claims = OidcAccessClaims {
        iss: issuer(),
        sub: Some(user.id.clone()),
        aud: client.client_id.clone(),
        client_id: client.client_id.clone(),
        scope: scope.to_string(),
        roles,
        jti: get_uuid(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: (now + Duration::seconds(CONFIG.oidc_access_token_ttl_secs())).timestamp(),
        token_type: "access_token".to_string(),
    };
    let access_token = auth::encode_oidc_access_token(&access_claims)?;

    let id_token = if scopes.contains(&"openid") {
        let claims = IdTokenClaims {
            iss: access_claims.iss.clone(),
            sub: user.id.clone(),
            aud: client.client_id.clone(),
            exp: (now + Duration::seconds(CONFIG.oidc_id_token_ttl_secs())).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            auth_time: now.timestamp(),
            azp: client.client_id.clone(),
            nonce: nonce.map(String::from),
            name: None,
            preferred_username: user.username.clone(),
            email: scopes.contains(&"email").then(|| user.email.clone()),
            email_verified: scopes.contains(&"email").then_some(user.email_verified),
            phone_number: scopes.contains(&"phone").then(|| user.phone.clone()).flatten(),
            phone_number_verified: scopes.contains(&"phone").then_some(user.phone_verified),
        };
        Some(auth::encode_oidc_id_token(&claims)?)
    } else {
        None
    };

    let refresh_token = if with_refresh {
        let (token, jti, expires_at) = auth::encode_oidc_refresh_token(&user.id, &client.client_id, scope)?;
        let token_hash = crypto::sha256_hex(token.as_bytes());
        let mut record = RefreshToken::new(&jti, &user.id, &token_hash, None, None, Duration::seconds(CONFIG.oidc_refresh_token_ttl_secs()));
        record.expires_at = expires_at;
        record.insert(conn).await?;
        Some(token)
    } else {
        None
    };

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: CONFIG.oidc_access_token_ttl_secs(),
        refresh_token,
        id_token,
        scope: scope.to_string(),
    })
}

async fn authenticated_client(client_id: &str, client_secret: Option<&str>, conn: &DbConn) -> Result<OAuthClient, OAuthError> {
    let client = resolve_client(client_id, conn).await.map_err(|_| OAuthError::new(OAuthErrorCode::InvalidClient, "unknown client"))?;
    if !authenticate_client(&client, client_secret) {
        return Err(OAuthError::new(OAuthErrorCode::InvalidClient, "client authentication failed"));
    }
    Ok(client)
}

/// RFC 6749 §4.1.3 `authorization_code` grant.
pub async fn authorization_code_grant(
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: Option<&str>,
    code_verifier: Option<&str>,
    conn: &DbConn,
) -> Result<TokenResponse, OAuthError> {
    let client = authenticated_client(client_id, client_secret, conn).await?;

    let record = AuthorizationCode::try_consume(code, conn)
        .await?
        .ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "code unknown, expired, or already used"))?;

    if record.client_id != client.client_id || record.redirect_uri != redirect_uri {
        return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "redirect_uri or client_id mismatch"));
    }

    if let Some(challenge) = &record.code_challenge {
        let verifier = code_verifier.ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "code_verifier required"))?;
        let method = record.code_challenge_method.as_deref().unwrap_or("plain");
        if !super::verify_pkce(verifier, challenge, method) {
            return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "code_verifier does not match"));
        }
    }

    let user = User::find_by_id(&record.user_id, conn)
        .await
        .ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "user no longer exists"))?;

    let requested = split_scopes(&record.scopes);
    let with_refresh = client.supports_grant_type("refresh_token") && requested.contains(&"offline_access");

    mint(&user, &client, &record.scopes, record.nonce.as_deref(), with_refresh, conn).await.map_err(OAuthError::from)
}

/// RFC 6749 §6 `refresh_token` grant — identical rotation discipline to
/// the internal token family's `refresh` transition (§5): revoke the
/// presented token before minting its replacement.
pub async fn refresh_token_grant(refresh_token: &str, client_id: &str, client_secret: Option<&str>, redis: &RedisStore, conn: &DbConn) -> Result<TokenResponse, OAuthError> {
    let client = authenticated_client(client_id, client_secret, conn).await?;

    let claims = auth::decode_oidc_refresh_token(refresh_token).map_err(|_| OAuthError::new(OAuthErrorCode::InvalidGrant, "invalid refresh token"))?;
    if claims.client_id != client.client_id {
        return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "refresh token was not issued to this client"));
    }

    if blacklist::is_revoked(redis, &claims.jti, conn).await? {
        return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "refresh token revoked"));
    }

    let record = RefreshToken::find_by_id(&claims.jti, conn)
        .await
        .ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "refresh token not recognized"))?;
    let presented_hash = crypto::sha256_hex(refresh_token.as_bytes());
    if !record.is_valid(&presented_hash) {
        return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "refresh token invalid"));
    }

    blacklist::revoke(redis, &record.id, Some(&record.user_id), record.expires_at, conn).await?;
    RefreshToken::revoke(&record.id, conn).await?;

    let user = User::find_by_id(&record.user_id, conn)
        .await
        .ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "user no longer exists"))?;

    mint(&user, &client, &claims.scope, None, true, conn).await.map_err(OAuthError::from)
}

/// RFC 6749 §4.4 `client_credentials` grant — no user, scope narrowed
/// to whatever the client itself is allowed.
pub async fn client_credentials_grant(client_id: &str, client_secret: Option<&str>, scope: Option<&str>, conn: &DbConn) -> Result<TokenResponse, OAuthError> {
    let client = authenticated_client(client_id, client_secret, conn).await?;
    if !client.supports_grant_type("client_credentials") {
        return Err(OAuthError::new(OAuthErrorCode::UnauthorizedClient, "client is not registered for client_credentials"));
    }

    let requested = scope.map(split_scopes).unwrap_or_default();
    let granted = if requested.is_empty() {
        client.allowed_scopes.clone()
    } else {
        if !client.allows_scopes(&requested) {
            return Err(OAuthError::new(OAuthErrorCode::InvalidScope, "requested scope exceeds what this client is allowed"));
        }
        requested.join(" ")
    };

    let now = Utc::now();
    let access_claims = OidcAccessClaims {
        iss: issuer(),
        sub: None,
        aud: client.client_id.clone(),
        client_id: client.client_id.clone(),
        scope: granted.clone(),
        roles: Vec::new(),
        jti: get_uuid(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: (now + Duration::seconds(CONFIG.oidc_access_token_ttl_secs())).timestamp(),
        token_type: "access_token".to_string(),
    };
    let access_token = auth::encode_oidc_access_token(&access_claims).map_err(OAuthError::from)?;

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: CONFIG.oidc_access_token_ttl_secs(),
        refresh_token: None,
        id_token: None,
        scope: granted,
    })
}

/// RFC 8628 §3.4 device-code grant — polled repeatedly by the device
/// until the user approves, denies, or the code expires. `interval_secs`
/// governs the `slow_down` floor: a poll inside the last-polled window
/// tightens the interval rather than outright failing (§4.4).
pub async fn device_code_grant(device_code: &str, client_id: &str, conn: &DbConn) -> Result<TokenResponse, OAuthError> {
    let client = resolve_client(client_id, conn).await.map_err(|_| OAuthError::new(OAuthErrorCode::InvalidClient, "unknown client"))?;
    if !client.supports_grant_type("urn:ietf:params:oauth:grant-type:device_code") {
        return Err(OAuthError::new(OAuthErrorCode::UnauthorizedClient, "client is not registered for the device code grant"));
    }

    let record = DeviceCode::find_by_device_code(device_code, conn)
        .await
        .ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "device_code unknown"))?;

    if record.client_id != client.client_id {
        return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "device_code was not issued to this client"));
    }

    if record.expires_at <= Utc::now().naive_utc() {
        return Err(OAuthError::new(OAuthErrorCode::ExpiredToken, "device_code expired"));
    }

    if let Some(last_polled) = record.last_polled_at {
        let min_gap = Duration::seconds(record.interval_secs as i64);
        if Utc::now().naive_utc() - last_polled < min_gap {
            DeviceCode::touch_polled(device_code, conn).await?;
            return Err(OAuthError::new(OAuthErrorCode::SlowDown, "polling too frequently"));
        }
    }
    DeviceCode::touch_polled(device_code, conn).await?;

    match record.status() {
        DeviceCodeStatus::Pending => Err(OAuthError::new(OAuthErrorCode::AuthorizationPending, "authorization pending")),
        DeviceCodeStatus::Denied => Err(OAuthError::new(OAuthErrorCode::AccessDenied, "user denied the request")),
        DeviceCodeStatus::Expired => Err(OAuthError::new(OAuthErrorCode::ExpiredToken, "device_code expired")),
        DeviceCodeStatus::Consumed => Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "device_code already redeemed")),
        DeviceCodeStatus::Approved => {
            if !DeviceCode::try_consume(device_code, conn).await? {
                return Err(OAuthError::new(OAuthErrorCode::InvalidGrant, "device_code already redeemed"));
            }
            let user_id = record.user_id.as_deref().ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "approved device_code missing a user"))?;
            let user = User::find_by_id(user_id, conn).await.ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidGrant, "user no longer exists"))?;
            let with_refresh = client.supports_grant_type("refresh_token");
            mint(&user, &client, &record.scopes, None, with_refresh, conn).await.map_err(OAuthError::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_rfc6749_wire_strings() {
        assert_eq!(OAuthErrorCode::InvalidGrant.as_str(), "invalid_grant");
        assert_eq!(OAuthErrorCode::UnsupportedGrantType.as_str(), "unsupported_grant_type");
        assert_eq!(OAuthErrorCode::AuthorizationPending.as_str(), "authorization_pending");
        assert_eq!(OAuthErrorCode::SlowDown.as_str(), "slow_down");
    }

    #[test]
    fn internal_errors_never_leak_as_a_distinct_rfc_code() {
        let oauth_err: OAuthError = Error::validation("bad redirect_uri").into();
        assert_eq!(oauth_err.error, "invalid_grant");
        assert_eq!(oauth_err.error_description, "bad redirect_uri");
    }
}
