//! Starting the daemon.

use std::{fs, process};
use std::future::pending;
use std::sync::Arc;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::oneshot;
use crate::commons::error::Error;
use crate::config::Config;
use crate::constants::{
    HTTP_REQUEST_TIMEOUT, ROAHIST_SERVER_APP, ROAHIST_VERSION,
};
use crate::server::gate::RunGate;
use crate::server::history::RoaHistoryStore;
use crate::server::manager::RoaHistoryManager;
use crate::server::source::{HttpRoaSource, RoaSource};
use super::http::server::HttpServer;


/// Creates the manager for the given config.
pub fn build_manager(
    config: &Config
) -> Result<RoaHistoryManager<HttpRoaSource>, Error> {
    let store = RoaHistoryStore::create(&config.storage_uri)?;
    let source = HttpRoaSource::new(
        config.source_uri.clone(), config.source_timeout()
    ).map_err(|err| {
        Error::internal(format!("cannot create HTTP client: {err}"))
    })?;
    Ok(RoaHistoryManager::new(
        store, source, RunGate::new(config.min_run_interval())
    ))
}

/// Runs the daemon until it is stopped.
///
/// If `signal_running` is given, it is triggered once the HTTP listener
/// accepts connections.
pub async fn start_daemon(
    config: Arc<Config>,
    signal_running: Option<oneshot::Sender<()>>,
) -> Result<(), Error> {
    write_pid_file(&config)?;

    let manager = Arc::new(build_manager(&config)?);
    let server = HttpServer::new(manager.clone());

    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr).await.map_err(|err| {
        Error::internal(format!("could not bind to {addr}: {err}"))
    })?;
    info!("{ROAHIST_SERVER_APP} {ROAHIST_VERSION} listening on {addr}");
    if let Some(tx) = signal_running {
        let _ = tx.send(());
    }

    let scheduler = async {
        match config.ingest_interval() {
            Some(every) => manager.run_scheduler(every).await,
            None => pending().await,
        }
    };

    select!(
        _ = http_listener(server, listener) => {
            error!("http server stopped unexpectedly")
        }
        _ = scheduler => error!("scheduler stopped unexpectedly"),
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping {ROAHIST_SERVER_APP}");
            return Ok(())
        }
    );

    Err(Error::internal("stopping roahist process"))
}

/// Serves HTTP requests from the listener.
///
/// Only returns if accepting connections fails.
pub async fn http_listener<S: RoaSource>(
    server: HttpServer<S>,
    listener: TcpListener,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(err) => {
                error!("Fatal error in HTTP server: {err}");
                return;
            }
        };
        let server = server.clone();
        tokio::task::spawn(async move {
            let conn = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(HTTP_REQUEST_TIMEOUT)
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |req| {
                        let server = server.clone();
                        async move { server.process_request(req).await }
                    }),
                );
            if let Err(err) = conn.await {
                debug!("HTTP connection closed with error: {err}");
            }
        });
    }
}

fn write_pid_file(config: &Config) -> Result<(), Error> {
    if let Some(path) = config.pid_file() {
        fs::write(path, process::id().to_string()).map_err(|err| {
            Error::internal(format!(
                "could not write PID file '{}': {}", path.display(), err
            ))
        })?;
    }
    Ok(())
}
