//
// Blacklist Service (C5)
//
// A token is revoked if its jti fingerprint is in the ephemeral store,
// in the persistent store, or its refresh-token record is marked
// revoked. Revocation writes both stores; the ephemeral write is
// best-effort, the persistent write must succeed (§4.5).
//
use chrono::Utc;

use crate::crypto::sha256_hex;
use crate::db::models::BlacklistEntry;
use crate::db::DbConn;
use crate::error::Error;
use crate::redis_store::{fail_open_on_outage, RedisStore};
use crate::CONFIG;

fn fingerprint(jti: &str) -> String {
    sha256_hex(jti.as_bytes())
}

/// Revokes `jti` through `exp`. The persistent write is the durability
/// boundary; a failure there is returned to the caller. The ephemeral
/// write degrades silently — a miss there only costs the fast path,
/// the persistent store is still consulted on fallback.
pub async fn revoke(redis: &RedisStore, jti: &str, user_id: Option<&str>, exp: chrono::NaiveDateTime, conn: &DbConn) -> Result<(), Error> {
    let fp = fingerprint(jti);

    BlacklistEntry::insert(&fp, user_id, exp, conn).await?;

    let ttl = (exp - Utc::now().naive_utc()).num_seconds().max(1) as u64;
    if let Err(e) = redis.blacklist_put(&fp, ttl).await {
        warn!("Failed to write blacklist entry to ephemeral store: {:?}", e);
    }

    Ok(())
}

/// §4.5 query path: ephemeral first, persistent fallback. A persistent
/// store outage is fail-closed (treated as revoked) unless
/// `fail_open_on_store_outage` is configured.
pub async fn is_revoked(redis: &RedisStore, jti: &str, conn: &DbConn) -> Result<bool, Error> {
    let fp = fingerprint(jti);

    match redis.blacklist_contains(&fp).await {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(e) => warn!("Ephemeral blacklist lookup failed, falling back to persistent store: {:?}", e),
    }

    match BlacklistEntry::exists(&fp, conn).await {
        Ok(found) => Ok(found),
        Err(e) if fail_open_on_outage() => {
            warn!("Persistent blacklist lookup failed, failing open per configuration: {:?}", e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Loads every still-live persistent entry into the ephemeral store.
/// Run once at startup (§4.5) so a cold ephemeral store doesn't let a
/// token revoked before the last restart back in before the persistent
/// fallback would otherwise catch it.
pub async fn rehydrate(redis: &RedisStore, conn: &DbConn) -> Result<usize, Error> {
    let entries = BlacklistEntry::all_live(conn).await?;
    let now = Utc::now().naive_utc();
    let mut rehydrated = 0;
    for entry in &entries {
        let ttl = (entry.expires_at - now).num_seconds().max(1) as u64;
        if let Err(e) = redis.blacklist_put(&entry.jti_fingerprint, ttl).await {
            warn!("Failed to rehydrate blacklist entry into ephemeral store: {:?}", e);
            continue;
        }
        rehydrated += 1;
    }
    info!("Rehydrated {}/{} blacklist entries into the ephemeral store", rehydrated, entries.len());
    Ok(rehydrated)
}

/// Purges expired persistent entries. Entries are only removed once
/// past their original token `exp`, by which point the ephemeral copy
/// (TTL-bound to the same expiry) has already dropped out on its own.
pub async fn purge_expired(conn: &DbConn) -> Result<usize, Error> {
    BlacklistEntry::purge_expired(conn).await
}

pub fn blacklist_purge_interval_secs() -> u64 {
    CONFIG.blacklist_purge_interval_secs()
}
