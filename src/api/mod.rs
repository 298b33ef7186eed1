//! HTTP submission and status-query surface

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{handle_rejection, ApiError};
pub use routes::routes;

use crate::config::{ConfigError, PipelineConfig, ServerSection};
use crate::pipeline::PipelineService;
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;

/// HTTP server exposing a [`PipelineService`]
pub struct ApiServer {
    addr: SocketAddr,
    server: ServerSection,
    service: PipelineService,
}

impl ApiServer {
    pub fn new(config: &PipelineConfig, service: PipelineService) -> Result<Self, ConfigError> {
        Ok(Self {
            addr: config.socket_addr()?,
            server: config.server.clone(),
            service,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run<F>(self, shutdown: F) -> Result<(), warp::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let routes = routes(self.service, &self.server);
        let (addr, server) =
            warp::serve(routes).try_bind_with_graceful_shutdown(self.addr, shutdown)?;

        info!(
            %addr,
            api_prefix = %self.server.api_prefix,
            "HTTP server listening"
        );
        server.await;
        info!("HTTP server stopped");
        Ok(())
    }
}
