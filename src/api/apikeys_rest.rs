//
// /api-keys (§6, §3 Data Model — ApiKey)
//
use rocket::serde::json::Json;
use rocket::{delete, get, post};
use serde::{Deserialize, Serialize};

use super::Auth;
use crate::crypto;
use crate::db::models::ApiKey;
use crate::db::DbConn;
use crate::error::Error;
use crate::util::format_date;

const SECRET_BYTES: usize = 32;
const PREFIX_LEN: usize = 8;

#[derive(Debug, Serialize)]
pub struct ApiKeyDto {
    pub id: String,
    pub name: String,
    pub prefix: String,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl From<ApiKey> for ApiKeyDto {
    fn from(k: ApiKey) -> Self {
        Self {
            id: k.id,
            name: k.name,
            prefix: k.prefix,
            scopes: k.scope_set().into_iter().map(String::from).collect(),
            is_active: k.is_active,
            expires_at: k.expires_at.as_ref().map(format_date),
            created_at: format_date(&k.created_at),
            last_used_at: k.last_used_at.as_ref().map(format_date),
        }
    }
}

fn owner_id(auth: &Auth) -> Result<&str, Error> {
    auth.0.user_id().ok_or_else(|| Error::forbidden("this credential cannot hold api keys"))
}

#[get("/api-keys")]
pub async fn list_keys(auth: Auth, conn: DbConn) -> Result<Json<Vec<ApiKeyDto>>, Error> {
    let user_id = owner_id(&auth)?;
    let keys = ApiKey::list_for_user(user_id, &conn).await?;
    Ok(Json(keys.into_iter().map(ApiKeyDto::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_in_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: String,
    pub api_key: String,
    pub name: String,
    pub prefix: String,
    pub scopes: Vec<String>,
}

/// The full key (`agw_<prefix><secret>`) is returned exactly once; only
/// its SHA-256 is ever persisted (§3, §6).
#[post("/api-keys", data = "<body>")]
pub async fn create_key(body: Json<CreateApiKeyRequest>, auth: Auth, conn: DbConn) -> Result<Json<CreateApiKeyResponse>, Error> {
    let user_id = owner_id(&auth)?;
    if body.name.trim().is_empty() {
        return Err(Error::validation("name must not be empty"));
    }

    let raw = crypto::generate_token(SECRET_BYTES);
    let (prefix, secret) = raw.split_at(raw.len().min(PREFIX_LEN));
    let secret_hash = crypto::sha256_hex(secret.as_bytes());
    let scopes = body.scopes.join(" ");
    let expires_at = body.expires_in_secs.map(|secs| (chrono::Utc::now() + chrono::Duration::seconds(secs)).naive_utc());

    let id = ApiKey::insert(user_id, body.name.trim(), prefix, &secret_hash, &scopes, expires_at, &conn).await?;

    Ok(Json(CreateApiKeyResponse {
        id,
        api_key: format!("agw_{raw}"),
        name: body.name.clone(),
        prefix: prefix.to_string(),
        scopes: body.scopes.clone(),
    }))
}

#[delete("/api-keys/<key_id>")]
pub async fn revoke_key(key_id: &str, auth: Auth, conn: DbConn) -> Result<(), Error> {
    let user_id = owner_id(&auth)?;
    let keys = ApiKey::list_for_user(user_id, &conn).await?;
    if !keys.iter().any(|k| k.id == key_id) {
        return Err(Error::not_found("api key not found"));
    }
    ApiKey::revoke(key_id, &conn).await
}
