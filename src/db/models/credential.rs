use chrono::{NaiveDateTime, Utc};

use diesel::prelude::*;

use crate::db::{schema::{backup_codes, otps}, DbConn};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// §3 Data Model — One-time-passcode Record, shared by email/SMS OTP and
/// passwordless sign-in. `identifier` is the email/phone the code was sent
/// to, not a user id — a user may not exist yet at send time (sign-up OTP).
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = otps)]
pub struct Otp {
    pub id: String,
    pub identifier: String,
    pub purpose: String,
    pub code_hash: String,
    pub expires_at: NaiveDateTime,
    pub consumed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = otps)]
struct NewOtp<'a> {
    id: &'a str,
    identifier: &'a str,
    purpose: &'a str,
    code_hash: &'a str,
    expires_at: NaiveDateTime,
    created_at: NaiveDateTime,
}

impl Otp {
    pub async fn insert(identifier: &str, purpose: &str, code_hash: &str, ttl: chrono::Duration, conn: &DbConn) -> Result<(), Error> {
        let now = Utc::now().naive_utc();
        let new_otp = NewOtp {
            id: &get_uuid(),
            identifier,
            purpose,
            code_hash,
            expires_at: now + ttl,
            created_at: now,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(otps::table).values(&new_otp).execute(conn).map_res("Error inserting otp").map(|_| ())
            }
        }
    }

    /// Most recent unconsumed, unexpired code for (identifier, purpose) —
    /// the row `try_consume` attempts to atomically claim.
    pub async fn find_active(identifier: &str, purpose: &str, conn: &DbConn) -> Option<Self> {
        let identifier = identifier.to_string();
        let purpose = purpose.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                otps::table
                    .filter(otps::identifier.eq(&identifier))
                    .filter(otps::purpose.eq(&purpose))
                    .filter(otps::consumed_at.is_null())
                    .filter(otps::expires_at.gt(now))
                    .order(otps::created_at.desc())
                    .first::<Self>(conn)
                    .ok()
            }
        }
    }

    /// Atomic single-use consumption (§5), mirroring `AuthorizationCode::try_consume`.
    pub async fn try_consume(id: &str, conn: &DbConn) -> Result<bool, Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                let affected = diesel::update(
                    otps::table
                        .filter(otps::id.eq(&id))
                        .filter(otps::consumed_at.is_null())
                        .filter(otps::expires_at.gt(now)),
                )
                .set(otps::consumed_at.eq(Some(now)))
                .execute(conn)
                .map_res("Error consuming otp")?;
                Ok(affected > 0)
            }
        }
    }

    pub async fn purge_expired(conn: &DbConn) -> Result<usize, Error> {
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                diesel::delete(otps::table.filter(otps::expires_at.le(now))).execute(conn).map_res("Error purging otps")
            }
        }
    }
}

/// §3 Data Model — Backup Code. Single-use recovery code for 2FA; codes are
/// generated in a batch and stored hashed, never in plaintext.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = backup_codes)]
pub struct BackupCode {
    pub id: String,
    pub user_id: String,
    pub code_hash: String,
    pub used_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = backup_codes)]
struct NewBackupCode<'a> {
    id: &'a str,
    user_id: &'a str,
    code_hash: &'a str,
    created_at: NaiveDateTime,
}

impl BackupCode {
    pub async fn insert_batch(user_id: &str, code_hashes: &[String], conn: &DbConn) -> Result<(), Error> {
        let now = Utc::now().naive_utc();
        let ids: Vec<String> = code_hashes.iter().map(|_| get_uuid()).collect();
        let new_codes: Vec<NewBackupCode> = ids
            .iter()
            .zip(code_hashes)
            .map(|(id, hash)| NewBackupCode { id, user_id, code_hash: hash, created_at: now })
            .collect();
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(backup_codes::table).values(&new_codes).execute(conn).map_res("Error inserting backup codes").map(|_| ())
            }
        }
    }

    pub async fn unused_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                backup_codes::table
                    .filter(backup_codes::user_id.eq(&user_id))
                    .filter(backup_codes::used_at.is_null())
                    .load::<Self>(conn)
                    .map_res("Error loading backup codes")
            }
        }
    }

    /// Atomic single-use consumption: marks this code used iff it wasn't
    /// already (§5), guarding against a concurrent replay of the same code.
    pub async fn try_consume(id: &str, conn: &DbConn) -> Result<bool, Error> {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! { conn:
            postgresql, sqlite {
                let affected = diesel::update(backup_codes::table.filter(backup_codes::id.eq(&id)).filter(backup_codes::used_at.is_null()))
                    .set(backup_codes::used_at.eq(Some(now)))
                    .execute(conn)
                    .map_res("Error consuming backup code")?;
                Ok(affected > 0)
            }
        }
    }

    pub async fn delete_all_for_user(user_id: &str, conn: &DbConn) -> Result<usize, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                diesel::delete(backup_codes::table.filter(backup_codes::user_id.eq(&user_id))).execute(conn).map_res("Error deleting backup codes")
            }
        }
    }
}
