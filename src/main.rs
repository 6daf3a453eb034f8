//! # Load Balancer Entry Point
//!
//! Parses configuration, builds the shared application state, starts the
//! health-check loop, and serves HTTP/2 with prior knowledge (h2c) over a
//! manual accept loop — the same hand-rolled serve loop the reference
//! crate uses, now wired to stop accepting new connections on a shutdown
//! signal instead of running forever.

use hyper::server::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use reverse_proxy_lb::graceful_shutdown::spawn_signal_listener;
use reverse_proxy_lb::health_check;
use reverse_proxy_lb::{create_router, AppState, Config};
use std::net::{IpAddr, SocketAddr};
use tower::Service;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    let state = AppState::new(config.clone());
    let app = create_router(state.clone());

    let health_handle = health_check::spawn(
        state.pool.clone(),
        state.caches.clone(),
        state.health_batcher.clone(),
        &config,
    );

    // Drives the pool-cleanup and batcher-flush loops `AppState::new` already
    // started, not a separate handle, so one signal tears down every
    // background loop the process owns.
    let shutdown = state.shutdown.clone();
    spawn_signal_listener(shutdown.clone());

    let host: IpAddr = config.host.parse().unwrap_or_else(|_| [0, 0, 0, 0].into());
    let addr = SocketAddr::from((host, config.port));
    info!(%addr, "load balancer starting");
    info!(
        health_cache_ttl_ms = config.health_cache_ttl_ms,
        stats_cache_ttl_ms = config.stats_cache_ttl_ms,
        routing_cache_ttl_ms = config.routing_cache_ttl_ms,
        "cache configuration"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let app = app.clone();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = hyper::service::service_fn(move |req| {
                        let mut app = app.clone();
                        async move {
                            app.call(req).await.map_err(|e| {
                                error!("service error: {:?}", e);
                                std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e))
                            })
                        }
                    });

                    if let Err(err) = http2::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        error!("HTTP/2 connection error: {:?}", err);
                    }
                });
            }
            _ = shutdown.wait_for_shutdown() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    health_handle.abort();
    state.connections.close();
    shutdown.complete_shutdown();

    Ok(())
}
