//
// `/introspect` (RFC 7662) and `/revoke` (RFC 7009) — both operate on
// either member of the OIDC token family and both require client
// authentication, but neither ever reports failure for an unrecognized
// token: introspection answers `{active: false}`, revocation answers
// 200 regardless (§4.4).
//
use chrono::Utc;
use serde::Serialize;

use super::{authenticate_client, issuer, resolve_client};
use crate::auth;
use crate::blacklist;
use crate::crypto;
use crate::db::models::RefreshToken;
use crate::db::DbConn;
use crate::error::Error;
use crate::redis_store::RedisStore;

#[derive(Debug, Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self { active: false, scope: None, client_id: None, sub: None, exp: None, token_type: None }
    }
}

async fn require_client(client_id: &str, client_secret: Option<&str>, conn: &DbConn) -> Result<(), Error> {
    let client = resolve_client(client_id, conn).await?;
    if !authenticate_client(&client, client_secret) {
        return Err(Error::unauthenticated("client authentication failed"));
    }
    Ok(())
}

pub async fn introspect(token: &str, client_id: &str, client_secret: Option<&str>, redis: &RedisStore, conn: &DbConn) -> Result<IntrospectionResponse, Error> {
    require_client(client_id, client_secret, conn).await?;

    if let Ok(claims) = auth::decode_oidc_access_token(token, &issuer()) {
        if blacklist::is_revoked(redis, &claims.jti, conn).await? {
            return Ok(IntrospectionResponse::inactive());
        }
        return Ok(IntrospectionResponse {
            active: true,
            scope: Some(claims.scope),
            client_id: Some(claims.client_id),
            sub: claims.sub,
            exp: Some(claims.exp),
            token_type: Some("access_token".to_string()),
        });
    }

    if let Ok(claims) = auth::decode_oidc_refresh_token(token) {
        if blacklist::is_revoked(redis, &claims.jti, conn).await? {
            return Ok(IntrospectionResponse::inactive());
        }
        let presented_hash = crypto::sha256_hex(token.as_bytes());
        let live = RefreshToken::find_by_id(&claims.jti, conn).await.is_some_and(|r| r.is_valid(&presented_hash));
        if !live {
            return Ok(IntrospectionResponse::inactive());
        }
        return Ok(IntrospectionResponse {
            active: true,
            scope: Some(claims.scope),
            client_id: Some(claims.client_id),
            sub: Some(claims.sub),
            exp: Some(claims.exp),
            token_type: Some("refresh_token".to_string()),
        });
    }

    Ok(IntrospectionResponse::inactive())
}

/// `token_type_hint` only shortcuts which family to try first; both are
/// always checked regardless, since a client can't be trusted to pass
/// it correctly.
pub async fn revoke(token: &str, token_type_hint: Option<&str>, client_id: &str, client_secret: Option<&str>, redis: &RedisStore, conn: &DbConn) -> Result<(), Error> {
    require_client(client_id, client_secret, conn).await?;
    let _ = token_type_hint;

    if let Ok(claims) = auth::decode_oidc_refresh_token(token) {
        if let Some(record) = RefreshToken::find_by_id(&claims.jti, conn).await {
            blacklist::revoke(redis, &record.id, Some(&record.user_id), record.expires_at, conn).await?;
            RefreshToken::revoke(&record.id, conn).await?;
        }
        return Ok(());
    }

    if let Ok(claims) = auth::decode_oidc_access_token(token, &issuer()) {
        let exp = chrono::DateTime::from_timestamp(claims.exp, 0).map(|dt| dt.naive_utc()).unwrap_or_else(|| Utc::now().naive_utc());
        blacklist::revoke(redis, &claims.jti, claims.sub.as_deref(), exp, conn).await?;
    }

    Ok(())
}
