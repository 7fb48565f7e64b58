use chrono::{NaiveDateTime, Utc};

use diesel::prelude::*;

use crate::db::{schema::audit_entries, DbConn};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// §3 Data Model — Audit Entry. `metadata` is a serialized JSON blob of
/// whatever detail the calling component wants attached (client_id,
/// device fingerprint, reason); kept as opaque text rather than a typed
/// column because the set of actions that get audited grows over time.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = audit_entries)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub outcome: String,
    pub ip: Option<String>,
    pub metadata: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = audit_entries)]
struct NewAuditEntry<'a> {
    id: &'a str,
    user_id: Option<&'a str>,
    action: &'a str,
    outcome: &'a str,
    ip: Option<&'a str>,
    metadata: Option<&'a str>,
    created_at: NaiveDateTime,
}

impl AuditEntry {
    pub async fn record(user_id: Option<&str>, action: &str, outcome: &str, ip: Option<&str>, metadata: Option<&str>, conn: &DbConn) -> Result<(), Error> {
        let entry = NewAuditEntry {
            id: &get_uuid(),
            user_id,
            action,
            outcome,
            ip,
            metadata,
            created_at: Utc::now().naive_utc(),
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(audit_entries::table).values(&entry).execute(conn).map_res("Error inserting audit entry").map(|_| ())
            }
        }
    }

    pub async fn recent_for_user(user_id: &str, limit: i64, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                audit_entries::table
                    .filter(audit_entries::user_id.eq(&user_id))
                    .order(audit_entries::created_at.desc())
                    .limit(limit)
                    .load::<Self>(conn)
                    .map_res("Error loading audit entries for user")
            }
        }
    }
}
