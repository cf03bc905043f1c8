use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use std::convert::Infallible;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;

pub mod challenge;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ident;
pub mod message;
pub mod metrics;
pub mod store;
pub mod task;
pub mod utils;

use config::Config;
use context::AppContext;
use handlers::dispatch::DispatchTable;
use handlers::handle_websocket;
use store::MemoryAccountStore;

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

fn json_response(body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(Bytes::from(body.to_string())));
    res.headers_mut()
        .insert("Content-Type", "application/json".parse().unwrap());
    res
}

async fn http_handler(req: Request<IncomingBody>, ctx: AppContext) -> HttpResult {
    let path = req.uri().path();

    let response = if path == ctx.config.well_known_path() {
        // The unauthenticated self-identity document, readable from any
        // origin so signup clients can fetch it cross-site.
        let mut res = json_response(serde_json::json!({
            "selfIdent": ctx.config.self_ident_blob,
        }));
        res.headers_mut()
            .insert("Access-Control-Allow-Origin", "*".parse().unwrap());
        res
    } else {
        match path {
            "/health" => match health::health_check(&ctx.store).await {
                Ok(_) => Response::new(Full::new(Bytes::from("OK"))),
                Err(e) => {
                    tracing::error!("Health check failed: {}", e);
                    let mut res =
                        Response::new(Full::new(Bytes::from("Service Unavailable")));
                    *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                    res
                }
            },
            "/metrics" => match metrics::gather_metrics() {
                Ok(metrics_data) => {
                    let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                    res.headers_mut().insert(
                        "Content-Type",
                        "text/plain; version=0.0.4".parse().unwrap(),
                    );
                    res
                }
                Err(e) => {
                    tracing::error!("Failed to gather metrics: {}", e);
                    let mut res =
                        Response::new(Full::new(Bytes::from("Internal Server Error")));
                    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    res
                }
            },
            _ => {
                let mut not_found = Response::new(Full::new(Bytes::from("Not Found")));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                not_found
            }
        }
    };

    Ok(response)
}

pub async fn run_http_server(ctx: AppContext, listener: TcpListener) -> Result<()> {
    tracing::info!(
        "HTTP server listening on http://{}",
        listener.local_addr()?
    );

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| http_handler(req, ctx.clone()));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

pub async fn run_websocket_server(ctx: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to accept socket: {}", e);
                continue;
            }
        };

        let ctx = ctx.clone();

        tokio::spawn(async move {
            handle_websocket(socket, addr, ctx).await;
        });
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Validate the protocol route table before accepting anything.
    let dispatch = Arc::new(DispatchTable::protocol());
    dispatch.validate()?;

    // The demo server keeps accounts in process; a deployment substitutes a
    // persistent AccountStore implementation here.
    let store = Arc::new(MemoryAccountStore::new());
    tracing::info!("Using in-memory account store");

    let ctx = AppContext::new(store, config.clone(), dispatch);

    let ws_listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(
        "Transit server listening on 0.0.0.0:{} (WebSocket)",
        config.port
    );

    let http_listener = TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;

    let websocket_server = run_websocket_server(ctx.clone(), ws_listener);
    let http_server = run_http_server(ctx, http_listener);

    tokio::select! {
        _ = websocket_server => {
            tracing::info!("WebSocket server shut down.");
        },
        res = http_server => {
            if let Err(e) = res {
                tracing::error!("HTTP server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    Ok(())
}
