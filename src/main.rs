//! LanDrop server binary.
//!
//! Bridges a phone browser and this machine's Downloads folder over the
//! local network: the router serves the embedded client page, the
//! listing/download API, and the upload endpoints. Startup resolves the
//! root directory, prints the LAN address for the phone, and the process
//! then runs until the OS service manager stops it — per-request
//! failures are answered, never fatal.

mod atomic;
mod background;
mod config;
mod error;
mod etag;
mod files;
mod frontend;
mod http;
mod locking;
mod logging;
mod netinfo;
mod storage;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span, warn};

use crate::config::Args;
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::locking::NameLocks;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the LanDrop server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let Some(root) = args.resolve_root() else {
        error!("cannot determine a downloads folder; pass --root or set LANDROP_ROOT");
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "root directory not resolved",
        ));
    };

    let storage = Arc::new(Storage::new(root));
    storage.ensure_root().await?;
    let locks = Arc::new(NameLocks::new());
    let upload_config = Arc::new(UploadConfig {
        max_total_size: args.upload_max_size,
        idle_timeout: Duration::from_secs(args.upload_idle_timeout_secs),
    });

    // temp artifacts from a previous run belong to no live upload
    if let Err(err) = background::sweep_stale_artifacts(&storage, Duration::ZERO).await {
        warn!(error = %err, "startup temp sweep failed");
    }

    let mut app = Router::new()
        .route("/api/files/list", get(files::list_files))
        .route("/api/files/download/{name}", get(files::download_file))
        .route(
            "/api/upload",
            post(upload::upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/upload/raw",
            post(upload::upload_raw).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/version", get(version::get_version_info))
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage.clone()))
        .layer(Extension(locks))
        .layer(Extension(upload_config));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    match netinfo::local_address() {
        Some(ip) => info!("open http://{}:{}/ on your phone", ip, args.port),
        None => info!(
            "no network route detected; open http://<this-machine-ip>:{}/ on your phone",
            args.port
        ),
    }
    info!("serving {} at {}", storage.root_path().display(), addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    background::spawn_background_tasks(storage, Duration::from_secs(args.temp_ttl_secs));
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
