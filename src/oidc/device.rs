//
// Device flow (§4.4, RFC 8628) — `/device/code` issues the pair the
// device polls with; `/device/approve` is the interactive half a user
// completes on a second screen, after which the `/token` device-code
// grant (token.rs) can redeem the device_code exactly once.
//
use chrono::Duration;

use super::{resolve_client, split_scopes};
use crate::crypto;
use crate::db::models::DeviceCode;
use crate::db::DbConn;
use crate::error::Error;
use crate::CONFIG;

pub struct DeviceCodeIssue {
    pub device_code: String,
    pub user_code: String,
    pub interval_secs: i64,
    pub expires_in: i64,
}

pub async fn request_code(client_id: &str, scope: &str, conn: &DbConn) -> Result<DeviceCodeIssue, Error> {
    let client = resolve_client(client_id, conn).await?;
    let requested = split_scopes(scope);
    if !client.allows_scopes(&requested) {
        return Err(Error::validation("requested scope exceeds what this client is allowed"));
    }

    let device_code = crypto::generate_token(32);
    let user_code = crypto::generate_user_code();
    let interval = CONFIG.oidc_device_poll_interval_secs();
    let ttl = CONFIG.oidc_device_code_ttl_secs();

    DeviceCode::insert(&device_code, &user_code, &client.client_id, scope, interval as i32, Duration::seconds(ttl), conn).await?;

    Ok(DeviceCodeIssue { device_code, user_code, interval_secs: interval, expires_in: ttl })
}

/// Resolved out-of-band by an interactive login the same way
/// `authorize::authorize` expects (§4.4). Approving a `user_code` that
/// isn't pending (already approved, denied, or expired) is a no-op
/// failure rather than an error — the caller only needs to know it
/// didn't transition.
pub async fn approve(user_code: &str, user_id: &str, conn: &DbConn) -> Result<bool, Error> {
    let record = DeviceCode::find_by_user_code(user_code, conn).await.ok_or_else(|| Error::not_found("device code"))?;
    DeviceCode::try_approve(&record.device_code, user_id, conn).await
}

pub async fn deny(user_code: &str, conn: &DbConn) -> Result<(), Error> {
    let record = DeviceCode::find_by_user_code(user_code, conn).await.ok_or_else(|| Error::not_found("device code"))?;
    DeviceCode::deny(&record.device_code, conn).await
}
