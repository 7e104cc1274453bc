//! API Server
//!
//! Serves the REST router until a shutdown signal arrives.

use crate::error::{Error, Result};
use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::Orchestrator;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiServerConfig {
    fn parsed_origins(&self) -> Result<Vec<HeaderValue>> {
        self.cors_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| {
                    Error::Configuration(format!("invalid CORS origin {:?}: {}", origin, e))
                })
            })
            .collect()
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            orchestrator,
            shutdown_tx,
        }
    }

    /// Run the API server until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let app = RestRouter::new(self.orchestrator.clone())
            .with_cors_origins(self.config.parsed_origins()?)
            .build();

        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!("REST API listening on {}", self.config.rest_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_invalid_cors_origin() {
        let config = ApiServerConfig {
            cors_origins: vec!["http://ok.example".into(), "bad\norigin".into()],
            ..Default::default()
        };
        assert_matches!(config.parsed_origins(), Err(Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let h = harness(Vec::new()).await;
        let config = ApiServerConfig {
            rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = Arc::new(ApiServer::new(config, h.orchestrator.clone()));

        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };
        // The signal is dropped until the server subscribes, so keep sending
        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            while !running.is_finished() {
                server.shutdown();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(stopped.is_ok());
        assert!(running.await.unwrap().is_ok());
    }
}
