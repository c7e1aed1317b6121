use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

mod api;
mod config;
mod error;
mod pricing;
mod provider;
mod recorder;
mod relay;
mod router;
mod scenario;
mod session;
mod state;
mod supervisor;
mod temp_profile;
mod translate;

use config::ConfigStore;
use recorder::Recorder;
use router::Router;
use session::SessionStore;
use state::AppState;
use supervisor::{ExitCode, PidLock};
use temp_profile::TempProfileStore;

/// Root of the filesystem layout (§6.4): config, PID file, log, and usage
/// database all live under one directory.
fn home_dir() -> PathBuf {
    if let Ok(explicit) = std::env::var("ZEN_ROUTER_HOME") {
        return PathBuf::from(explicit);
    }
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".zen-router"))
        .unwrap_or_else(|_| PathBuf::from(".zen-router"))
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    match run().await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("zen-router: fatal startup error: {e:#}");
            std::process::ExitCode::from(ExitCode::FatalStartup as u8)
        }
    }
}

/// `zen-router --healthcheck`: GET /healthz and translate the result into an
/// exit code, for use as a container HEALTHCHECK without needing curl/wget.
async fn healthcheck() -> std::process::ExitCode {
    let port = std::env::var("ZEN_ROUTER_PROXY_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(19841);
    let url = format!("http://127.0.0.1:{port}/healthz");
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => std::process::ExitCode::SUCCESS,
        _ => std::process::ExitCode::FAILURE,
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zen_router=info,tower_http=warn".into()),
        )
        .init();

    let home = home_dir();
    std::fs::create_dir_all(&home).with_context(|| format!("creating {}", home.display()))?;
    let config_path = home.join("config.json");
    let pid_path = home.join("daemon.pid");
    let log_path = home.join("daemon.log");
    let usage_path = home.join("usage.jsonl");

    let config_store = ConfigStore::load(config_path.clone())
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let cfg = config_store.current().await;
    let proxy_port = cfg.gateway.proxy_port;
    let web_port = cfg.gateway.web_port;

    let background_requested = std::env::args().any(|a| a == "--background");
    if background_requested && !supervisor::is_child_mode() {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let status_url = format!("http://127.0.0.1:{web_port}/api/v1/daemon/status");
        supervisor::spawn_background(&args, &log_path, &status_url).await?;
        return Ok(ExitCode::Ok);
    }

    let _pid_lock = match PidLock::acquire(&pid_path) {
        Ok(lock) => lock,
        Err(e) => {
            warn!(error = %e, "startup aborted");
            return Ok(ExitCode::AlreadyRunning);
        }
    };

    info!(proxy_port, web_port, config = %config_path.display(), "zen-router starting");

    let recorder = Arc::new(Recorder::new(cfg.gateway.usage_channel_capacity, cfg.gateway.health_window, Some(usage_path)));
    let sessions = Arc::new(SessionStore::new(cfg.gateway.session_capacity));
    let temp_profiles = TempProfileStore::new(cfg.gateway.temp_profile_capacity);
    let router_engine = Router::new()?;
    let config_store = Arc::new(config_store);

    let state = Arc::new(AppState {
        config: Arc::clone(&config_store),
        router: router_engine,
        recorder: Arc::clone(&recorder),
        sessions: Arc::clone(&sessions),
        temp_profiles,
        started_at: Instant::now(),
        version: env!("CARGO_PKG_VERSION"),
        proxy_port,
        web_port,
    });

    tokio::spawn({
        let recorder = Arc::clone(&recorder);
        async move { recorder.run().await }
    });
    tokio::spawn({
        let config_store = Arc::clone(&config_store);
        async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            interval.tick().await; // first tick fires immediately; skip so we don't reload at startup
            loop {
                interval.tick().await;
                config_store.poll_reload().await;
            }
        }
    });

    let proxy_addr: SocketAddr = format!("127.0.0.1:{proxy_port}").parse()?;
    let web_addr: SocketAddr = format!("127.0.0.1:{web_port}").parse()?;
    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr)
        .await
        .with_context(|| format!("binding ingress listener on {proxy_addr}"))?;
    let web_listener = tokio::net::TcpListener::bind(web_addr)
        .await
        .with_context(|| format!("binding management listener on {web_addr}"))?;

    info!(%proxy_addr, "ingress listening");
    info!(%web_addr, "management listening");

    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let ingress_app = api::ingress_router(Arc::clone(&state))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());
    let management_app = api::management_router(Arc::clone(&state))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());

    let (shutdown_tx, shutdown_rx1) = tokio::sync::watch::channel(false);
    let shutdown_rx2 = shutdown_tx.subscribe();
    let ingress_shutdown = {
        let mut rx = shutdown_rx1;
        async move { let _ = rx.changed().await; }
    };
    let management_shutdown = {
        let mut rx = shutdown_rx2;
        async move { let _ = rx.changed().await; }
    };

    let ingress_server = axum::serve(proxy_listener, ingress_app).with_graceful_shutdown(ingress_shutdown);
    let management_server = axum::serve(web_listener, management_app).with_graceful_shutdown(management_shutdown);

    tokio::pin!(ingress_server);
    tokio::pin!(management_server);

    let exit_code = tokio::select! {
        res = &mut ingress_server => {
            res.context("ingress server error")?;
            ExitCode::Ok
        }
        res = &mut management_server => {
            res.context("management server error")?;
            ExitCode::Ok
        }
        signal = supervisor::wait_for_shutdown_signal() => {
            info!("shutdown signal received, draining in-flight requests");
            let _ = shutdown_tx.send(true);
            if tokio::time::timeout(supervisor::SHUTDOWN_GRACE, async {
                let _ = tokio::join!(&mut ingress_server, &mut management_server);
            })
            .await
            .is_err()
            {
                warn!("graceful shutdown grace period elapsed, forcing exit");
            }
            signal.exit_code()
        }
    };

    Ok(exit_code)
}
