//
// /sessions (§6, C6 Session Service)
//
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use serde::Serialize;

use super::Auth;
use crate::db::models::Session;
use crate::db::DbConn;
use crate::error::Error;
use crate::redis_store::RedisStore;
use crate::session;
use crate::util::format_date;

#[derive(Debug, Serialize)]
pub struct SessionDto {
    pub id: String,
    pub device_name: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
    pub last_active_at: String,
}

impl From<Session> for SessionDto {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            device_name: s.device_name,
            ip: s.ip,
            user_agent: s.user_agent,
            created_at: format_date(&s.created_at),
            last_active_at: format_date(&s.last_active_at),
        }
    }
}

fn owner_id(auth: &Auth) -> Result<&str, Error> {
    auth.0.user_id().ok_or_else(|| Error::forbidden("this credential has no sessions"))
}

#[get("/sessions")]
pub async fn list_sessions(auth: Auth, conn: DbConn) -> Result<Json<Vec<SessionDto>>, Error> {
    let user_id = owner_id(&auth)?;
    let sessions = session::list_for_user(user_id, &conn).await?;
    Ok(Json(sessions.into_iter().map(SessionDto::from).collect()))
}

#[delete("/sessions/<session_id>")]
pub async fn delete_session(session_id: &str, auth: Auth, redis: &State<RedisStore>, conn: DbConn) -> Result<(), Error> {
    let user_id = owner_id(&auth)?;
    session::revoke_by_id(redis.inner(), user_id, session_id, &conn).await
}

#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}

#[post("/sessions/revoke-all")]
pub async fn revoke_all(auth: Auth, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<RevokeAllResponse>, Error> {
    let user_id = owner_id(&auth)?;
    let revoked = session::revoke_all_for_user(redis.inner(), user_id, None, &conn).await?;
    Ok(Json(RevokeAllResponse { revoked }))
}

