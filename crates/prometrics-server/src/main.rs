use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use clap::Parser;
use prometrics::{MetricsState, instrument_router};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "prometrics",
    about = "Instrumented demo HTTP server exposing Prometheus metrics"
)]
struct Cli {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "4567")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("prometrics=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let addr = format!("{}:{}", cli.host, cli.port);

    let state = Arc::new(MetricsState::new()?);
    let started_at = Instant::now();

    let routes = Router::new()
        .route("/test", get(simulated_work))
        .route("/healthz", get(health_live))
        .route("/status", get(move || server_status(started_at)));
    let app = instrument_router(routes, state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("prometrics demo server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

// Sleeps up to two seconds so scrapes have a latency spread to look at.
async fn simulated_work() -> &'static str {
    let delay = rand::random::<f64>() * 2.0;
    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    "/test called"
}

async fn health_live() -> impl IntoResponse {
    StatusCode::OK
}

async fn server_status(started_at: Instant) -> impl IntoResponse {
    Json(ServerStatus {
        status: "ok",
        uptime_seconds: started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct ServerStatus {
    status: &'static str,
    uptime_seconds: u64,
}
