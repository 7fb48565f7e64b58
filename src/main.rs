#[macro_use]
extern crate log;

use std::process::ExitCode;
use std::sync::Arc;

use tonic::transport::Server as GrpcServer;

mod api;
mod auth;
mod blacklist;
mod config;
mod crypto;
mod db;
mod enforcement;
mod error;
mod grpc;
mod ipfilter;
mod janitors;
mod keys;
mod ldap;
mod mail;
mod oidc;
mod redis_store;
mod session;
mod state_machine;
mod totp;
mod util;

#[cfg(test)]
mod tests;

use config::CONFIG;
use db::DbPool;
use janitors::JanitorSet;
use redis_store::RedisStore;

fn init_logging() -> Result<(), fern::InitError> {
    let level = CONFIG.log_level().parse().unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{} {} {}] {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"), record.target(), record.level(), message))
        })
        .level(level)
        .chain(std::io::stdout());

    #[cfg(unix)]
    if CONFIG.enable_syslog() {
        let syslog_fmt = syslog::Formatter3164 { facility: syslog::Facility::LOG_USER, hostname: None, process: "authd".into(), pid: std::process::id() };
        match syslog::unix(syslog_fmt) {
            Ok(logger) => dispatch = dispatch.chain(logger),
            Err(e) => eprintln!("Could not connect to syslog: {e}"),
        }
    }

    dispatch.apply()?;
    Ok(())
}

/// Stage 0: everything that must succeed before the process accepts a
/// single request. Forces `KEYS` evaluation (`CONFIG` is already forced
/// by the time `main` runs, since `init_logging` reads it first) so an
/// unreadable key file fails startup instead of the first signed token.
fn preflight() {
    info!("authd {} starting up", env!("CARGO_PKG_VERSION"));
    std::sync::LazyLock::force(&keys::KEYS);
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler") };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler").recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[rocket::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    preflight();

    let pool = match DbPool::from_config() {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to set up the database pool: {:?}", e);
            return ExitCode::FAILURE;
        }
    };
    let redis = match RedisStore::connect().await {
        Ok(redis) => redis,
        Err(e) => {
            error!("Failed to connect to Redis: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    {
        let conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to acquire a startup connection: {:?}", e);
                return ExitCode::FAILURE;
            }
        };
        match blacklist::rehydrate(&redis, &conn).await {
            Ok(count) => info!("Rehydrated {count} blacklist entries into the ephemeral store"),
            Err(e) => warn!("Blacklist rehydration failed, starting with a cold cache: {:?}", e),
        }
    }

    let janitors = JanitorSet::spawn(Arc::new(pool.clone()));
    let grpc_pool = pool.clone();
    let grpc_redis = redis.clone();

    let rocket = rocket::build()
        .manage(pool)
        .manage(redis)
        .mount("/", api::discovery_routes())
        .mount("/", api::health_routes())
        .mount("/auth", api::auth_routes())
        .mount("/sessions", api::session_routes())
        .mount("/api-keys", api::apikey_routes())
        .mount("/oidc", api::oauth_routes())
        .register("/", api::catchers())
        .attach(util::AppHeaders())
        .attach(util::Cors())
        .attach(util::BetterLogging(CONFIG.log_level() == "debug"))
        .attach(api::EnforcementFairing);

    let http = match rocket.ignite().await {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to ignite Rocket: {e}");
            janitors.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    let grpc_addr = match format!("0.0.0.0:{}", CONFIG.grpc_port()).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid gRPC bind address: {e}");
            janitors.shutdown().await;
            return ExitCode::FAILURE;
        }
    };
    let grpc_service = grpc::pb::auth_service_server::AuthServiceServer::new(grpc::AuthServiceImpl::new(grpc_pool, grpc_redis));

    info!("gRPC AuthService listening on 0.0.0.0:{}", CONFIG.grpc_port());

    let http_task = tokio::spawn(async move { http.launch().await });
    let grpc_task = tokio::spawn(async move { GrpcServer::builder().add_service(grpc_service).serve_with_shutdown(grpc_addr, shutdown_signal()).await });

    let (http_res, grpc_res) = tokio::join!(http_task, grpc_task);
    janitors.shutdown().await;

    match http_res {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!("REST surface exited with an error: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("REST surface task panicked: {e}");
            return ExitCode::FAILURE;
        }
    }
    match grpc_res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("gRPC surface exited with an error: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("gRPC surface task panicked: {e}");
            return ExitCode::FAILURE;
        }
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
