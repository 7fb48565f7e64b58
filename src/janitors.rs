//
// Background Janitors (C10, §4.5/§9)
//
// Independently cancellable maintenance loops: blacklist purge, expired
// OTP/authorization/device-code purge. Each is its own `tokio::spawn`ed
// task watching a shared `CancellationToken` so shutdown can stop all
// of them without waiting on whichever has the longest interval.
//
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::models::{AuthorizationCode, DeviceCode, Otp};
use crate::db::DbPool;
use crate::CONFIG;

/// One spawned janitor plus the token that stops it.
pub struct Janitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Janitor {
    fn spawn<F, Fut>(interval_secs: u64, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
        });
        Self { token, handle }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Waits for the task to finish, bounded by the configured grace
    /// period (§9) so a stuck janitor can't hang shutdown forever.
    pub async fn join(self) {
        let grace = Duration::from_secs(CONFIG.shutdown_grace_period_secs());
        if tokio::time::timeout(grace, self.handle).await.is_err() {
            warn!("Janitor did not stop within the shutdown grace period");
        }
    }
}

/// Groups every janitor spawned at startup so `main.rs` can stop and
/// join them all as one unit during graceful shutdown.
pub struct JanitorSet {
    janitors: Vec<Janitor>,
}

impl JanitorSet {
    pub fn spawn(pool: Arc<DbPool>) -> Self {
        let blacklist_pool = pool.clone();
        let blacklist_janitor = Janitor::spawn(CONFIG.blacklist_purge_interval_secs(), move || {
            let pool = blacklist_pool.clone();
            async move {
                let conn = match pool.get().await {
                    Ok(conn) => conn,
                    Err(e) => return error!("Blacklist janitor could not get a connection: {:?}", e),
                };
                match crate::blacklist::purge_expired(&conn).await {
                    Ok(count) if count > 0 => info!("Purged {count} expired blacklist entries"),
                    Ok(_) => {}
                    Err(e) => error!("Blacklist purge failed: {:?}", e),
                }
            }
        });

        let code_pool = pool;
        let code_janitor = Janitor::spawn(CONFIG.expired_code_purge_interval_secs(), move || {
            let pool = code_pool.clone();
            async move {
                let conn = match pool.get().await {
                    Ok(conn) => conn,
                    Err(e) => return error!("Code janitor could not get a connection: {:?}", e),
                };
                match Otp::purge_expired(&conn).await {
                    Ok(count) if count > 0 => info!("Purged {count} expired OTP codes"),
                    Ok(_) => {}
                    Err(e) => error!("OTP purge failed: {:?}", e),
                }
                match AuthorizationCode::purge_expired(&conn).await {
                    Ok(count) if count > 0 => info!("Purged {count} expired authorization codes"),
                    Ok(_) => {}
                    Err(e) => error!("Authorization code purge failed: {:?}", e),
                }
                match DeviceCode::purge_expired(&conn).await {
                    Ok(count) if count > 0 => info!("Purged {count} expired device codes"),
                    Ok(_) => {}
                    Err(e) => error!("Device code purge failed: {:?}", e),
                }
            }
        });

        Self { janitors: vec![blacklist_janitor, code_janitor] }
    }

    pub async fn shutdown(self) {
        for j in &self.janitors {
            j.stop();
        }
        for j in self.janitors {
            j.join().await;
        }
    }
}
