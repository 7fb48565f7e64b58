use chrono::{NaiveDateTime, Utc};

use diesel::prelude::*;

use crate::db::{schema::{api_keys, applications}, DbConn};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// §3 Data Model — API Key, a long-lived credential scoped to a user.
/// `secret_hash` is the hash of the full key; `prefix` is the short
/// non-secret identifier returned in listings so the raw key never needs
/// to be re-displayed.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = api_keys)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub prefix: String,
    pub secret_hash: String,
    pub scopes: String,
    pub is_active: bool,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub last_used_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = api_keys)]
struct NewApiKey<'a> {
    id: &'a str,
    user_id: &'a str,
    name: &'a str,
    prefix: &'a str,
    secret_hash: &'a str,
    scopes: &'a str,
    is_active: bool,
    expires_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

impl ApiKey {
    pub fn scope_set(&self) -> Vec<&str> {
        self.scopes.split_whitespace().collect()
    }

    pub fn is_valid(&self) -> bool {
        self.is_active && self.expires_at.map(|exp| exp > Utc::now().naive_utc()).unwrap_or(true)
    }

    pub async fn insert(user_id: &str, name: &str, prefix: &str, secret_hash: &str, scopes: &str, expires_at: Option<NaiveDateTime>, conn: &DbConn) -> Result<String, Error> {
        let id = get_uuid();
        let new_key = NewApiKey {
            id: &id,
            user_id,
            name,
            prefix,
            secret_hash,
            scopes,
            is_active: true,
            expires_at,
            created_at: Utc::now().naive_utc(),
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(api_keys::table).values(&new_key).execute(conn).map_res("Error inserting api key")
            }
        }?;
        Ok(id)
    }

    pub async fn find_by_prefix(prefix: &str, conn: &DbConn) -> Option<Self> {
        let prefix = prefix.to_string();
        db_run! { conn:
            postgresql, sqlite {
                api_keys::table.filter(api_keys::prefix.eq(prefix)).first::<Self>(conn).ok()
            }
        }
    }

    pub async fn list_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                api_keys::table
                    .filter(api_keys::user_id.eq(&user_id))
                    .order(api_keys::created_at.desc())
                    .load::<Self>(conn)
                    .map_res("Error loading api keys for user")
            }
        }
    }

    pub async fn touch_last_used(id: &str, conn: &DbConn) -> Result<(), Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(api_keys::table.find(id))
                    .set(api_keys::last_used_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error touching api key")
                    .map(|_| ())
            }
        }
    }

    pub async fn revoke(id: &str, conn: &DbConn) -> Result<(), Error> {
        let id = id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(api_keys::table.find(id))
                    .set(api_keys::is_active.eq(false))
                    .execute(conn)
                    .map_res("Error revoking api key")
                    .map(|_| ())
            }
        }
    }
}

/// §3 Data Model — Application, a service-account-style client used for
/// machine-to-machine client-credentials issuance rather than interactive
/// OIDC flows (`OAuthClient` covers the latter).
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = applications)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub secret_hash: String,
    pub prefix: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = applications)]
struct NewApplication<'a> {
    id: &'a str,
    name: &'a str,
    secret_hash: &'a str,
    prefix: &'a str,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl Application {
    pub async fn insert(name: &str, secret_hash: &str, prefix: &str, conn: &DbConn) -> Result<String, Error> {
        let id = get_uuid();
        let new_app = NewApplication {
            id: &id,
            name,
            secret_hash,
            prefix,
            is_active: true,
            created_at: Utc::now().naive_utc(),
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(applications::table).values(&new_app).execute(conn).map_res("Error inserting application")
            }
        }?;
        Ok(id)
    }

    pub async fn find_by_prefix(prefix: &str, conn: &DbConn) -> Option<Self> {
        let prefix = prefix.to_string();
        db_run! { conn:
            postgresql, sqlite {
                applications::table.filter(applications::prefix.eq(prefix)).first::<Self>(conn).ok()
            }
        }
    }
}
