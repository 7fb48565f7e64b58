//
// /health, /ready, /live (§6)
//
// `/live` only proves the process is scheduling requests at all — no
// dependency is touched. `/ready` and `/health` probe the database and
// Redis, the two things an otherwise-running process can still be
// useless without.
//
use rocket::serde::json::Json;
use rocket::{get, State};
use serde::Serialize;

use crate::db::{get_sql_server_version, DbConn};
use crate::redis_store::RedisStore;

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub components: std::collections::BTreeMap<&'static str, ComponentStatus>,
}

async fn probe_database(conn: &DbConn) -> ComponentStatus {
    let version = get_sql_server_version(conn).await;
    ComponentStatus { status: "ok", detail: Some(version) }
}

async fn probe_redis(redis: &RedisStore) -> ComponentStatus {
    match redis.exists("health:probe").await {
        Ok(_) => ComponentStatus { status: "ok", detail: None },
        Err(e) => ComponentStatus { status: "down", detail: Some(e.client_message()) },
    }
}

#[get("/health")]
pub async fn health(conn: DbConn, redis: &State<RedisStore>) -> Json<HealthReport> {
    let mut components = std::collections::BTreeMap::new();
    components.insert("database", probe_database(&conn).await);
    components.insert("redis", probe_redis(redis.inner()).await);
    let status = if components.values().all(|c| c.status == "ok") { "ok" } else { "degraded" };
    Json(HealthReport { status, components })
}

#[get("/ready")]
pub async fn ready(conn: DbConn, redis: &State<RedisStore>) -> Json<HealthReport> {
    health(conn, redis).await
}

#[get("/live")]
pub fn live() -> Json<HealthReport> {
    Json(HealthReport { status: "ok", components: std::collections::BTreeMap::new() })
}
