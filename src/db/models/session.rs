use chrono::{NaiveDateTime, Utc};

use diesel::prelude::*;

use crate::db::{schema::sessions, DbConn};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// §3 Data Model — Session, the user-facing view of a live refresh token:
/// one row per `RefreshToken`, carrying the device metadata C6 surfaces in
/// "list my sessions" without exposing the token hash itself.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token_id: String,
    pub device_name: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: NaiveDateTime,
    pub last_active_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
struct NewSession<'a> {
    id: &'a str,
    user_id: &'a str,
    refresh_token_id: &'a str,
    device_name: Option<&'a str>,
    ip: Option<&'a str>,
    user_agent: Option<&'a str>,
    created_at: NaiveDateTime,
    last_active_at: NaiveDateTime,
}

impl Session {
    pub async fn insert(user_id: &str, refresh_token_id: &str, device_name: Option<&str>, ip: Option<&str>, user_agent: Option<&str>, conn: &DbConn) -> Result<String, Error> {
        let id = get_uuid();
        let now = Utc::now().naive_utc();
        let new_session = NewSession {
            id: &id,
            user_id,
            refresh_token_id,
            device_name,
            ip,
            user_agent,
            created_at: now,
            last_active_at: now,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(sessions::table).values(&new_session).execute(conn).map_res("Error inserting session")
            }
        }?;
        Ok(id)
    }

    pub async fn find_by_id(id: &str, conn: &DbConn) -> Option<Self> {
        let id = id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                sessions::table.find(id).first::<Self>(conn).ok()
            }
        }
    }

    pub async fn find_by_refresh_token_id(refresh_token_id: &str, conn: &DbConn) -> Option<Self> {
        let refresh_token_id = refresh_token_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                sessions::table.filter(sessions::refresh_token_id.eq(refresh_token_id)).first::<Self>(conn).ok()
            }
        }
    }

    /// Live sessions for a user, oldest-active-first — the order C6's
    /// trim-to-cap eviction walks.
    pub async fn active_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                sessions::table
                    .filter(sessions::user_id.eq(&user_id))
                    .filter(sessions::revoked_at.is_null())
                    .order(sessions::last_active_at.asc())
                    .load::<Self>(conn)
                    .map_res("Error loading sessions for user")
            }
        }
    }

    pub async fn touch(id: &str, conn: &DbConn) -> Result<(), Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(sessions::table.find(id))
                    .set(sessions::last_active_at.eq(now))
                    .execute(conn)
                    .map_res("Error touching session")
                    .map(|_| ())
            }
        }
    }

    pub async fn revoke(id: &str, conn: &DbConn) -> Result<(), Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(sessions::table.find(id))
                    .set(sessions::revoked_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error revoking session")
                    .map(|_| ())
            }
        }
    }

    pub async fn revoke_all_for_user(user_id: &str, conn: &DbConn) -> Result<usize, Error> {
        let user_id = user_id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(sessions::table.filter(sessions::user_id.eq(&user_id).and(sessions::revoked_at.is_null())))
                    .set(sessions::revoked_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error revoking all sessions for user")
            }
        }
    }
}
