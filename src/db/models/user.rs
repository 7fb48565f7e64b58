use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{schema::users, DbConn};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

use diesel::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Human,
    Service,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Human => "human",
            AccountType::Service => "service",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "service" => AccountType::Service,
            _ => AccountType::Human,
        }
    }
}

/// §3 Data Model — User. Service accounts are exempt from 2FA, email
/// verification, and password policy, enforced by callers checking
/// `account_type` before invoking those checks.
#[derive(Debug, Identifiable, Queryable, Selectable, AsChangeset)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub account_type: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub totp_secret: Option<Vec<u8>>,
    /// Step number of the last accepted TOTP code, rejecting reuse of a
    /// code still inside its window (§4.3).
    pub last_totp_step: Option<i64>,
    /// Rotated whenever credentials change; currently advisory (no JWT
    /// claim carries it yet — kept for a future stamp-exception check).
    pub security_stamp: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn new(email: &str, password_hash: &str, account_type: AccountType) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: get_uuid(),
            email: email.trim().to_lowercase(),
            username: None,
            phone: None,
            password_hash: password_hash.to_string(),
            account_type: account_type.as_str().to_string(),
            is_active: true,
            email_verified: false,
            phone_verified: false,
            totp_secret: None,
            last_totp_step: None,
            security_stamp: get_uuid(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn account_type(&self) -> AccountType {
        AccountType::from_str(&self.account_type)
    }

    pub fn totp_enabled(&self) -> bool {
        self.totp_secret.is_some()
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: &'a str,
    email: &'a str,
    username: Option<&'a str>,
    phone: Option<&'a str>,
    password_hash: &'a str,
    account_type: &'a str,
    is_active: bool,
    email_verified: bool,
    phone_verified: bool,
    totp_secret: Option<&'a [u8]>,
    last_totp_step: Option<i64>,
    security_stamp: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl User {
    pub async fn insert(&self, conn: &DbConn) -> Result<(), Error> {
        let new_user = NewUser {
            id: &self.id,
            email: &self.email,
            username: self.username.as_deref(),
            phone: self.phone.as_deref(),
            password_hash: &self.password_hash,
            account_type: &self.account_type,
            is_active: self.is_active,
            email_verified: self.email_verified,
            phone_verified: self.phone_verified,
            totp_secret: self.totp_secret.as_deref(),
            last_totp_step: self.last_totp_step,
            security_stamp: &self.security_stamp,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(users::table).values(&new_user).execute(conn).map_res("Error inserting user").map(|_| ())
            }
        }
    }

    pub async fn save(&mut self, conn: &DbConn) -> Result<(), Error> {
        self.updated_at = Utc::now().naive_utc();
        let id = self.id.clone();
        db_run! { conn:
            postgresql, sqlite {
                diesel::update(users::table.find(id)).set(&*self).execute(conn).map_res("Error saving user").map(|_| ())
            }
        }
    }

    pub async fn find_by_id(id: &str, conn: &DbConn) -> Option<Self> {
        let id = id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                users::table.find(id).first::<Self>(conn).ok()
            }
        }
    }

    /// Matches on case-folded email or username (§3: both are case-folded
    /// and unique).
    pub async fn find_by_identifier(identifier: &str, conn: &DbConn) -> Option<Self> {
        let identifier = identifier.trim().to_lowercase();
        db_run! { conn:
            postgresql, sqlite {
                users::table
                    .filter(users::email.eq(&identifier).or(users::username.eq(&identifier)))
                    .first::<Self>(conn)
                    .ok()
            }
        }
    }

    pub async fn find_by_email(email: &str, conn: &DbConn) -> Option<Self> {
        let email = email.trim().to_lowercase();
        db_run! { conn:
            postgresql, sqlite {
                users::table.filter(users::email.eq(&email)).first::<Self>(conn).ok()
            }
        }
    }

    /// Atomic TOTP step consumption, mirroring `Otp::try_consume`: claims
    /// `step` for this user iff it's newer than whatever was last
    /// accepted, so the same code can't be replayed within its window.
    pub async fn try_consume_totp_step(id: &str, step: i64, conn: &DbConn) -> Result<bool, Error> {
        let id = id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                let affected = diesel::update(
                    users::table
                        .find(id)
                        .filter(users::last_totp_step.is_null().or(users::last_totp_step.lt(step))),
                )
                .set(users::last_totp_step.eq(step))
                .execute(conn)
                .map_res("Error consuming totp step")?;
                Ok(affected > 0)
            }
        }
    }
}
