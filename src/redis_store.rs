//
// Ephemeral Store (C2)
//
// Thin wrapper around a single auto-reconnecting Redis connection,
// backing the blacklist cache, rate-limit counters, OTP/device-code
// lookups, and anything else that wants sub-millisecond reads with a
// bounded lifetime. The persistent store (C1) is always the source of
// truth; this is an accelerator that callers degrade around on outage.
//
use redis::AsyncCommands;

use crate::error::Error;
use crate::CONFIG;

#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect() -> Result<Self, Error> {
        let client = redis::Client::open(CONFIG.redis_url()).map_err(Error::from)?;
        let conn = client.get_connection_manager().await.map_err(Error::from)?;
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.conn.clone().get(key).await.map_err(Error::from)
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        self.conn.clone().set_ex::<_, _, ()>(key, value, ttl_secs).await.map_err(Error::from)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, Error> {
        self.conn.clone().exists(key).await.map_err(Error::from)
    }

    pub async fn del(&self, key: &str) -> Result<(), Error> {
        self.conn.clone().del::<_, ()>(key).await.map_err(Error::from)
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<u64>, Error> {
        let ttl: i64 = self.conn.clone().ttl(key).await.map_err(Error::from)?;
        Ok(if ttl > 0 { Some(ttl as u64) } else { None })
    }

    /// Atomically increments `key`, setting its expiry only on the first
    /// increment — the counting-window idiom used by the rate limiter's
    /// fallback path and OTP resend throttling.
    pub async fn incr_with_window(&self, key: &str, window_secs: u64) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1).await.map_err(Error::from)?;
        if count == 1 {
            conn.expire::<_, ()>(key, window_secs as i64).await.map_err(Error::from)?;
        }
        Ok(count)
    }

    pub fn blacklist_key(fingerprint: &str) -> String {
        format!("blacklist:{fingerprint}")
    }

    pub async fn blacklist_put(&self, fingerprint: &str, ttl_secs: u64) -> Result<(), Error> {
        self.set_ex(&Self::blacklist_key(fingerprint), "1", ttl_secs.max(1)).await
    }

    pub async fn blacklist_contains(&self, fingerprint: &str) -> Result<bool, Error> {
        self.exists(&Self::blacklist_key(fingerprint)).await
    }
}

/// Whether a store failure should be treated as "not blacklisted"/"not
/// rate limited" (fail-open) or as a hard rejection (fail-closed), per
/// the configured policy (§4.5/§4.6).
pub fn fail_open_on_outage() -> bool {
    CONFIG.fail_open_on_store_outage()
}
