use chrono::{NaiveDateTime, Utc};

use diesel::prelude::*;

use crate::db::{schema::{blacklist_entries, refresh_tokens}, DbConn};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// §3 Data Model — Refresh-token Record.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub device_type: Option<String>,
    pub device_os: Option<String>,
    pub device_browser: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub last_active: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
}

impl RefreshToken {
    pub fn new(jti: &str, user_id: &str, token_hash: &str, ip: Option<String>, user_agent: Option<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: jti.to_string(),
            user_id: user_id.to_string(),
            token_hash: token_hash.to_string(),
            device_type: None,
            device_os: None,
            device_browser: None,
            ip,
            user_agent,
            last_active: now,
            created_at: now,
            expires_at: now + ttl,
            revoked_at: None,
        }
    }

    /// §3 invariant: valid iff the record exists, isn't revoked, isn't
    /// expired, and the presented token hashes to the stored hash.
    pub fn is_valid(&self, presented_hash: &str) -> bool {
        self.revoked_at.is_none() && self.expires_at > Utc::now().naive_utc() && crate::crypto::ct_eq(&self.token_hash, presented_hash)
    }

    pub async fn insert(&self, conn: &DbConn) -> Result<(), Error> {
        let new_token = NewRefreshToken {
            id: &self.id,
            user_id: &self.user_id,
            token_hash: &self.token_hash,
            device_type: self.device_type.as_deref(),
            device_os: self.device_os.as_deref(),
            device_browser: self.device_browser.as_deref(),
            ip: self.ip.as_deref(),
            user_agent: self.user_agent.as_deref(),
            last_active: self.last_active,
            created_at: self.created_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(refresh_tokens::table).values(&new_token).execute(conn).map_res("Error inserting refresh token").map(|_| ())
            }
        }
    }

    pub async fn find_by_id(id: &str, conn: &DbConn) -> Option<Self> {
        let id = id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                refresh_tokens::table.find(id).first::<Self>(conn).ok()
            }
        }
    }

    pub async fn revoke(id: &str, conn: &DbConn) -> Result<(), Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(refresh_tokens::table.find(id))
                    .set(refresh_tokens::revoked_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error revoking refresh token")
                    .map(|_| ())
            }
        }
    }

    pub async fn revoke_all_for_user(user_id: &str, conn: &DbConn) -> Result<usize, Error> {
        let user_id = user_id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(refresh_tokens::table.filter(refresh_tokens::user_id.eq(&user_id).and(refresh_tokens::revoked_at.is_null())))
                    .set(refresh_tokens::revoked_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error revoking all refresh tokens for user")
            }
        }
    }

    pub async fn touch_last_active(id: &str, conn: &DbConn) -> Result<(), Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(refresh_tokens::table.find(id))
                    .set(refresh_tokens::last_active.eq(now))
                    .execute(conn)
                    .map_res("Error touching refresh token")
                    .map(|_| ())
            }
        }
    }

    /// Active (non-revoked, unexpired) sessions for a user, oldest
    /// last-active first — the order `trim_to_cap` (C6) evicts from.
    pub async fn active_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let user_id = user_id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                refresh_tokens::table
                    .filter(refresh_tokens::user_id.eq(&user_id))
                    .filter(refresh_tokens::revoked_at.is_null())
                    .filter(refresh_tokens::expires_at.gt(now))
                    .order(refresh_tokens::last_active.asc())
                    .load::<Self>(conn)
                    .map_res("Error loading sessions for user")
            }
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = refresh_tokens)]
struct NewRefreshToken<'a> {
    id: &'a str,
    user_id: &'a str,
    token_hash: &'a str,
    device_type: Option<&'a str>,
    device_os: Option<&'a str>,
    device_browser: Option<&'a str>,
    ip: Option<&'a str>,
    user_agent: Option<&'a str>,
    last_active: NaiveDateTime,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
    revoked_at: Option<NaiveDateTime>,
}

/// §3 Data Model — Blacklist Entry; §4.5 durability-over-latency write path.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = blacklist_entries)]
pub struct BlacklistEntry {
    pub id: String,
    pub jti_fingerprint: String,
    pub user_id: Option<String>,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = blacklist_entries)]
struct NewBlacklistEntry<'a> {
    id: &'a str,
    jti_fingerprint: &'a str,
    user_id: Option<&'a str>,
    expires_at: NaiveDateTime,
}

impl BlacklistEntry {
    pub async fn insert(fingerprint: &str, user_id: Option<&str>, expires_at: NaiveDateTime, conn: &DbConn) -> Result<(), Error> {
        let entry = NewBlacklistEntry {
            id: &get_uuid(),
            jti_fingerprint: fingerprint,
            user_id,
            expires_at,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(blacklist_entries::table).values(&entry).execute(conn).map_res("Error inserting blacklist entry").map(|_| ())
            }
        }
    }

    pub async fn exists(fingerprint: &str, conn: &DbConn) -> Result<bool, Error> {
        let fingerprint = fingerprint.to_string();
        db_run! { conn:
            postgresql, sqlite {
                diesel::select(diesel::dsl::exists(blacklist_entries::table.filter(blacklist_entries::jti_fingerprint.eq(&fingerprint))))
                    .get_result(conn)
                    .map_res("Error checking blacklist")
            }
        }
    }

    /// Loads every still-live entry, used by C10 to rehydrate the ephemeral
    /// store at startup (§4.5).
    pub async fn all_live(conn: &DbConn) -> Result<Vec<Self>, Error> {
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                blacklist_entries::table.filter(blacklist_entries::expires_at.gt(now)).load::<Self>(conn).map_res("Error loading blacklist")
            }
        }
    }

    pub async fn purge_expired(conn: &DbConn) -> Result<usize, Error> {
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::delete(blacklist_entries::table.filter(blacklist_entries::expires_at.le(now))).execute(conn).map_res("Error purging blacklist")
            }
        }
    }
}
