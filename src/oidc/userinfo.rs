//
// `/userinfo` (OIDC Core §5.3) — claims filtered by the scope the
// presented access token actually carries, not the client's full
// allowed set.
//
use serde::Serialize;

use super::{issuer, split_scopes};
use crate::auth;
use crate::blacklist;
use crate::db::models::User;
use crate::db::DbConn;
use crate::error::Error;
use crate::redis_store::RedisStore;

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_verified: Option<bool>,
}

pub async fn userinfo(access_token: &str, redis: &RedisStore, conn: &DbConn) -> Result<UserInfo, Error> {
    let claims = auth::decode_oidc_access_token(access_token, &issuer())?;
    if blacklist::is_revoked(redis, &claims.jti, conn).await? {
        return Err(Error::unauthenticated("token revoked"));
    }
    let user_id = claims.sub.ok_or_else(|| Error::unauthenticated("token has no subject"))?;
    let user = User::find_by_id(&user_id, conn).await.ok_or_else(|| Error::unauthenticated("user no longer exists"))?;

    let scopes = split_scopes(&claims.scope);
    Ok(UserInfo {
        sub: user.id,
        preferred_username: scopes.contains(&"profile").then_some(user.username).flatten(),
        updated_at: scopes.contains(&"profile").then_some(user.updated_at.and_utc().timestamp()),
        email: scopes.contains(&"email").then_some(user.email),
        email_verified: scopes.contains(&"email").then_some(user.email_verified),
        phone_number: scopes.contains(&"phone").then_some(user.phone).flatten(),
        phone_number_verified: scopes.contains(&"phone").then_some(user.phone_verified),
    })
}
