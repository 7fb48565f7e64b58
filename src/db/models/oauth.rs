use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use diesel::prelude::*;

use crate::db::{
    schema::{authorization_codes, consents, device_codes, oauth_clients},
    DbConn,
};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// Scopes/grant-types/redirect-uris are stored as space-delimited strings;
/// `scope_set`/`redirect_uri_set` below split them for matching.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = oauth_clients)]
pub struct OAuthClient {
    pub id: String,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub redirect_uris: String,
    pub grant_types: String,
    pub allowed_scopes: String,
    pub pkce_required: bool,
    pub is_public: bool,
    pub consent_required: bool,
    pub owner_user_id: Option<String>,
    pub created_at: NaiveDateTime,
}

impl OAuthClient {
    pub fn redirect_uri_set(&self) -> Vec<&str> {
        self.redirect_uris.split_whitespace().collect()
    }

    pub fn grant_type_set(&self) -> Vec<&str> {
        self.grant_types.split_whitespace().collect()
    }

    pub fn scope_set(&self) -> Vec<&str> {
        self.allowed_scopes.split_whitespace().collect()
    }

    pub fn supports_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uri_set().contains(&uri)
    }

    pub fn supports_grant_type(&self, grant: &str) -> bool {
        self.grant_type_set().contains(&grant)
    }

    /// Requested scopes must be a subset of the client's allowed scopes.
    pub fn allows_scopes(&self, requested: &[&str]) -> bool {
        let allowed = self.scope_set();
        requested.iter().all(|s| allowed.contains(s))
    }

    pub async fn find_by_client_id(client_id: &str, conn: &DbConn) -> Option<Self> {
        let client_id = client_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                oauth_clients::table.filter(oauth_clients::client_id.eq(client_id)).first::<Self>(conn).ok()
            }
        }
    }
}

/// §3 Data Model — Authorization Code. `consumed_at` being set is the
/// single-use marker written atomically by `try_consume` (§5).
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = authorization_codes, primary_key(code))]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scopes: String,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub consumed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = authorization_codes)]
struct NewAuthorizationCode<'a> {
    code: &'a str,
    client_id: &'a str,
    user_id: &'a str,
    redirect_uri: &'a str,
    scopes: &'a str,
    nonce: Option<&'a str>,
    code_challenge: Option<&'a str>,
    code_challenge_method: Option<&'a str>,
    issued_at: NaiveDateTime,
    expires_at: NaiveDateTime,
}

impl AuthorizationCode {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        code: &str,
        client_id: &str,
        user_id: &str,
        redirect_uri: &str,
        scopes: &str,
        nonce: Option<&str>,
        code_challenge: Option<&str>,
        code_challenge_method: Option<&str>,
        ttl: chrono::Duration,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let now = Utc::now().naive_utc();
        let new_code = NewAuthorizationCode {
            code,
            client_id,
            user_id,
            redirect_uri,
            scopes,
            nonce,
            code_challenge,
            code_challenge_method,
            issued_at: now,
            expires_at: now + ttl,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(authorization_codes::table).values(&new_code).execute(conn).map_res("Error inserting authorization code").map(|_| ())
            }
        }
    }

    /// Atomic single-use consumption: the `UPDATE ... WHERE consumed_at IS
    /// NULL` only affects a row for the first caller; concurrent callers
    /// racing the same code see zero affected rows and get `None` (§5).
    pub async fn try_consume(code: &str, conn: &DbConn) -> Result<Option<Self>, Error> {
        let code = code.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                let affected = diesel::update(
                    authorization_codes::table
                        .filter(authorization_codes::code.eq(&code))
                        .filter(authorization_codes::consumed_at.is_null())
                        .filter(authorization_codes::expires_at.gt(now)),
                )
                .set(authorization_codes::consumed_at.eq(Some(now)))
                .execute(conn)
                .map_res("Error consuming authorization code")?;

                if affected == 0 {
                    Ok(None)
                } else {
                    authorization_codes::table.find(&code).first::<Self>(conn).optional().map_res("Error loading consumed code")
                }
            }
        }
    }

    pub async fn purge_expired(conn: &DbConn) -> Result<usize, Error> {
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::delete(authorization_codes::table.filter(authorization_codes::expires_at.le(now)))
                    .execute(conn)
                    .map_res("Error purging authorization codes")
            }
        }
    }
}

/// §3 Data Model — Device-code Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCodeStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    /// A token has already been minted for this code — the `/token`
    /// poll loop's single-use marker, set after a successful
    /// `approved` → token exchange so a replayed poll can't mint twice.
    Consumed,
}

impl DeviceCodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Consumed => "consumed",
        }
    }
}

#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = device_codes, primary_key(device_code))]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub client_id: String,
    pub scopes: String,
    pub interval_secs: i32,
    pub expires_at: NaiveDateTime,
    pub status: String,
    pub user_id: Option<String>,
    pub last_polled_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = device_codes)]
struct NewDeviceCode<'a> {
    device_code: &'a str,
    user_code: &'a str,
    client_id: &'a str,
    scopes: &'a str,
    interval_secs: i32,
    expires_at: NaiveDateTime,
    status: &'a str,
    last_polled_at: NaiveDateTime,
}

impl DeviceCode {
    pub fn status(&self) -> DeviceCodeStatus {
        match self.status.as_str() {
            "approved" => DeviceCodeStatus::Approved,
            "denied" => DeviceCodeStatus::Denied,
            "expired" => DeviceCodeStatus::Expired,
            "consumed" => DeviceCodeStatus::Consumed,
            _ => DeviceCodeStatus::Pending,
        }
    }

    pub async fn insert(device_code: &str, user_code: &str, client_id: &str, scopes: &str, interval_secs: i32, ttl: chrono::Duration, conn: &DbConn) -> Result<(), Error> {
        let now = Utc::now().naive_utc();
        let new_record = NewDeviceCode {
            device_code,
            user_code,
            client_id,
            scopes,
            interval_secs,
            expires_at: now + ttl,
            status: DeviceCodeStatus::Pending.as_str(),
            // Seeds the first poll's `slow_down` comparison (§5): without
            // an initial value here every device's first poll would read
            // `None` and skip the interval check entirely.
            last_polled_at: now,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(device_codes::table).values(&new_record).execute(conn).map_res("Error inserting device code").map(|_| ())
            }
        }
    }

    pub async fn find_by_device_code(device_code: &str, conn: &DbConn) -> Option<Self> {
        let device_code = device_code.to_string();
        db_run! { conn:
            postgresql, sqlite {
                device_codes::table.find(device_code).first::<Self>(conn).ok()
            }
        }
    }

    pub async fn find_by_user_code(user_code: &str, conn: &DbConn) -> Option<Self> {
        let user_code = user_code.to_string();
        db_run! { conn:
            postgresql, sqlite {
                device_codes::table.filter(device_codes::user_code.eq(user_code)).first::<Self>(conn).ok()
            }
        }
    }

    /// Compare-and-set pending→approved (§5); returns `false` if another
    /// caller already transitioned this record.
    pub async fn try_approve(device_code: &str, user_id: &str, conn: &DbConn) -> Result<bool, Error> {
        let device_code = device_code.to_string();
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                let affected = diesel::update(
                    device_codes::table
                        .filter(device_codes::device_code.eq(&device_code))
                        .filter(device_codes::status.eq("pending")),
                )
                .set((device_codes::status.eq("approved"), device_codes::user_id.eq(Some(user_id))))
                .execute(conn)
                .map_res("Error approving device code")?;
                Ok(affected > 0)
            }
        }
    }

    pub async fn deny(device_code: &str, conn: &DbConn) -> Result<(), Error> {
        let device_code = device_code.to_string();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(device_codes::table.filter(device_codes::device_code.eq(&device_code)).filter(device_codes::status.eq("pending")))
                    .set(device_codes::status.eq("denied"))
                    .execute(conn)
                    .map_res("Error denying device code")
                    .map(|_| ())
            }
        }
    }

    /// Compare-and-set approved→consumed (§5); returns `false` if another
    /// poll already consumed this code's single token issuance.
    pub async fn try_consume(device_code: &str, conn: &DbConn) -> Result<bool, Error> {
        let device_code = device_code.to_string();
        db_run! { conn:
            postgresql, sqlite {
                let affected = diesel::update(
                    device_codes::table
                        .filter(device_codes::device_code.eq(&device_code))
                        .filter(device_codes::status.eq("approved")),
                )
                .set(device_codes::status.eq("consumed"))
                .execute(conn)
                .map_res("Error consuming device code")?;
                Ok(affected > 0)
            }
        }
    }

    pub async fn touch_polled(device_code: &str, conn: &DbConn) -> Result<(), Error> {
        let device_code = device_code.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(device_codes::table.find(device_code))
                    .set(device_codes::last_polled_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error touching device code")
                    .map(|_| ())
            }
        }
    }

    pub async fn purge_expired(conn: &DbConn) -> Result<usize, Error> {
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::delete(device_codes::table.filter(device_codes::expires_at.le(now)))
                    .execute(conn)
                    .map_res("Error purging device codes")
            }
        }
    }
}

/// §3 Data Model — Consent ledger: (user, client) → granted scope set.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = consents)]
pub struct Consent {
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    pub granted_scopes: String,
    pub granted_at: NaiveDateTime,
}

impl Consent {
    pub fn scope_set(&self) -> Vec<&str> {
        self.granted_scopes.split_whitespace().collect()
    }

    pub fn covers(&self, requested: &[&str]) -> bool {
        let granted = self.scope_set();
        requested.iter().all(|s| granted.contains(s))
    }

    pub async fn find(user_id: &str, client_id: &str, conn: &DbConn) -> Option<Self> {
        let user_id = user_id.to_string();
        let client_id = client_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                consents::table
                    .filter(consents::user_id.eq(&user_id))
                    .filter(consents::client_id.eq(&client_id))
                    .first::<Self>(conn)
                    .ok()
            }
        }
    }

    pub async fn grant(user_id: &str, client_id: &str, scopes: &str, conn: &DbConn) -> Result<(), Error> {
        let existing = Self::find(user_id, client_id, conn).await;
        let now = Utc::now().naive_utc();
        match existing {
            Some(c) => {
                let id = c.id.clone();
                db_run! { conn:
                    postgresql, sqlite {
                        diesel::update(consents::table.find(id))
                            .set((consents::granted_scopes.eq(scopes), consents::granted_at.eq(now)))
                            .execute(conn)
                            .map_res("Error updating consent")
                            .map(|_| ())
                    }
                }
            }
            None => {
                let id = get_uuid();
                let user_id = user_id.to_string();
                let client_id = client_id.to_string();
                let scopes = scopes.to_string();
                db_run! { conn:
                    postgresql, sqlite {
                        diesel::insert_into(consents::table)
                            .values((
                                consents::id.eq(id),
                                consents::user_id.eq(user_id),
                                consents::client_id.eq(client_id),
                                consents::granted_scopes.eq(scopes),
                                consents::granted_at.eq(now),
                            ))
                            .execute(conn)
                            .map_res("Error inserting consent")
                            .map(|_| ())
                    }
                }
            }
        }
    }
}
