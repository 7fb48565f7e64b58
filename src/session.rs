//
// Session Service (C6)
//
// The user-facing view over refresh-token records: listing, revoking
// individual sessions (which blacklists the associated jti), revoking
// everything, and enforcing a configured cap on concurrent sessions.
//
use crate::blacklist;
use crate::db::models::{RefreshToken, Session};
use crate::db::DbConn;
use crate::error::Error;
use crate::redis_store::RedisStore;
use crate::CONFIG;

pub async fn list_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<Session>, Error> {
    Session::active_for_user(user_id, conn).await
}

/// Revokes a single session: blacklists its refresh token's jti, marks
/// the refresh-token record revoked, then marks the session itself
/// revoked. Returns `not_found` if the session doesn't belong to
/// `user_id`, so callers can't probe or revoke another user's session.
pub async fn revoke_by_id(redis: &RedisStore, user_id: &str, session_id: &str, conn: &DbConn) -> Result<(), Error> {
    let session = Session::find_by_id(session_id, conn).await.ok_or_else(|| Error::not_found("session not found"))?;
    if session.user_id != user_id {
        return Err(Error::not_found("session not found"));
    }

    if let Some(token) = RefreshToken::find_by_id(&session.refresh_token_id, conn).await {
        blacklist::revoke(redis, &token.id, Some(user_id), token.expires_at, conn).await?;
        RefreshToken::revoke(&token.id, conn).await?;
    }

    Session::revoke(&session.id, conn).await
}

/// Revokes every active session for a user. `except_session_id` lets
/// `change_password` (§4.3) keep the caller's own session alive while
/// tearing down every other one.
pub async fn revoke_all_for_user(redis: &RedisStore, user_id: &str, except_session_id: Option<&str>, conn: &DbConn) -> Result<usize, Error> {
    let sessions = Session::active_for_user(user_id, conn).await?;
    let mut revoked = 0;
    for session in sessions {
        if except_session_id == Some(session.id.as_str()) {
            continue;
        }
        if let Some(token) = RefreshToken::find_by_id(&session.refresh_token_id, conn).await {
            blacklist::revoke(redis, &token.id, Some(user_id), token.expires_at, conn).await?;
            RefreshToken::revoke(&token.id, conn).await?;
        }
        Session::revoke(&session.id, conn).await?;
        revoked += 1;
    }
    Ok(revoked)
}

/// Enforces `max_active_sessions` (0 = unlimited) by evicting the
/// least-recently-active sessions after a new one is created, per
/// §4.6. Called right after `Session::insert`.
pub async fn trim_to_cap(redis: &RedisStore, user_id: &str, conn: &DbConn) -> Result<usize, Error> {
    let cap = CONFIG.max_active_sessions();
    if cap == 0 {
        return Ok(0);
    }

    let sessions = Session::active_for_user(user_id, conn).await?;
    if sessions.len() <= cap as usize {
        return Ok(0);
    }

    let overflow = sessions.len() - cap as usize;
    let mut evicted = 0;
    for session in sessions.into_iter().take(overflow) {
        if let Some(token) = RefreshToken::find_by_id(&session.refresh_token_id, conn).await {
            blacklist::revoke(redis, &token.id, Some(user_id), token.expires_at, conn).await?;
            RefreshToken::revoke(&token.id, conn).await?;
        }
        Session::revoke(&session.id, conn).await?;
        evicted += 1;
    }
    Ok(evicted)
}

/// Bumps `last_active_at` for the session tied to `refresh_token_id`.
/// Called on refresh and on user-validation paths, not on every
/// access-token check (§4.6).
pub async fn touch(refresh_token_id: &str, conn: &DbConn) -> Result<(), Error> {
    if let Some(session) = Session::find_by_refresh_token_id(refresh_token_id, conn).await {
        Session::touch(&session.id, conn).await?;
    }
    Ok(())
}
