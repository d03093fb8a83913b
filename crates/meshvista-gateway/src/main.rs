use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meshvista_api::{HttpMeshApi, MeshApi};
use meshvista_core::MeshvistaConfig;
use meshvista_scheduler::{
    DnsRegenerator, MigrationRetry, Scheduler, SchedulerConfig, SchedulerDeps,
};
use meshvista_storage::{Database, MigrationRunner, SqliteCleanup, SqliteMigrator};
use tracing::{error, info, warn};

mod app;
mod dns;
mod http;

/// Config table key an operator login stores the session token under.
const SESSION_TOKEN_KEY: &str = "session_token";

#[derive(Parser)]
#[command(version, about = "Mesh network collection service")]
struct Args {
    /// Path to meshvista.toml (defaults to $MESHVISTA_CONFIG, then ~/.meshvista).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "meshvista_gateway=info,meshvista_scheduler=info,meshvista_collectors=info,\
                 meshvista_storage=info,meshvista_api=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // explicit path > MESHVISTA_CONFIG env > ~/.meshvista/meshvista.toml
    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("MESHVISTA_CONFIG").ok());
    let config = MeshvistaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MeshvistaConfig::default()
    });

    let db_path = &config.database.path;
    if let Err(e) = ensure_parent_dir(db_path) {
        warn!(path = %db_path, error = %e, "could not create database directory");
    }
    let db = Database::open(db_path)?;

    let token = match config.api.session_token.clone() {
        Some(token) => Some(token),
        None => db.get_config(SESSION_TOKEN_KEY)?,
    };
    let api = Arc::new(HttpMeshApi::new(
        config.api.base_url.clone(),
        token,
        Duration::from_secs(config.api.request_timeout_secs),
    )?);
    info!(
        authenticated = api.is_authenticated(),
        base_url = %config.api.base_url,
        "API client ready"
    );

    let migrator = Arc::new(SqliteMigrator::new(db.clone()));
    let skipped = match migrator.run(Some(api.as_ref() as &dyn MeshApi), false).await {
        Ok(report) => report.skipped_needs_auth,
        Err(e) => {
            error!(error = %e, "startup migrations failed");
            SqliteMigrator::auth_dependent()
        }
    };
    if !skipped.is_empty() {
        info!(?skipped, "migrations deferred until the API is authenticated");
    }

    let api: Arc<dyn MeshApi> = api;
    let dns: Option<Arc<dyn DnsRegenerator>> = if config.dns.enabled {
        info!(
            path = %config.dns.hosts_path,
            domain = %config.dns.domain,
            "DNS hosts generation enabled"
        );
        Some(Arc::new(dns::HostsFileDns::new(
            db.clone(),
            &config.dns.hosts_path,
            &config.dns.domain,
        )))
    } else {
        None
    };

    let scheduler_config = SchedulerConfig::from(&config);
    let deps = SchedulerDeps {
        api: api.clone(),
        db: db.clone(),
        collectors: meshvista_collectors::builtin_collectors(
            api.clone(),
            db.clone(),
            scheduler_config.device_interval,
        ),
        cleanup: Arc::new(SqliteCleanup::new(db.clone())),
        migration_retry: Some(Arc::new(MigrationRetry::new(migrator, skipped))),
        dns,
    };
    let scheduler = Arc::new(Scheduler::new(deps, scheduler_config));

    // the initial collection can take a while; serve HTTP meanwhile
    let startup = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start().await })
    };

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, db, api, scheduler.clone()));
    let router = app::build_router(state);

    info!("MeshVista gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the startup pass is tracked by the scheduler, so stop() still drains it
    startup.abort();
    scheduler.stop().await;
    info!("MeshVista gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT, shutting down");
    }
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_parent_dir_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("a/b/meshvista.db");
        ensure_parent_dir(db.to_str().unwrap()).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn ensure_parent_dir_reports_blocked_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let db = file.join("meshvista.db");
        assert!(ensure_parent_dir(db.to_str().unwrap()).is_err());
    }

    #[test]
    fn bare_file_name_needs_no_dir() {
        assert!(ensure_parent_dir("meshvista.db").is_ok());
    }
}
