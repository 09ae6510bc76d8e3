use crate::Metrics;
use anyhow::{Error as AnyhowError, Result};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsServerConfig {
    pub metrics_address: IpAddr,
    pub metrics_port: u16,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            metrics_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            metrics_port: 9464,
        }
    }
}

impl From<&MetricsServerConfig> for SocketAddr {
    fn from(config: &MetricsServerConfig) -> Self {
        SocketAddr::from((config.metrics_address, config.metrics_port))
    }
}

async fn prometheus_metrics_handler(
    State(metrics): State<Arc<Metrics>>,
) -> Result<String, (StatusCode, String)> {
    metrics.gather().map_err(|err| {
        error!(%err, "Failed to encode metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics_handler))
        .with_state(metrics)
}

pub async fn run_metrics_server(config: MetricsServerConfig, metrics: Arc<Metrics>) -> Result<()> {
    let addr = SocketAddr::from(&config);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Metrics server listening");

    axum::serve(listener, router(metrics).into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(AnyhowError::new)?;

    Ok(())
}
