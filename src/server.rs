//! TCP accept loop and WebSocket upgrade.

use crate::config::RelayConfig;
use crate::connection::ConnectionSession;
use crate::error::Result;
use crate::router::Router;
use crate::transport;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

pub struct SignalingServer {
    listener: TcpListener,
    ws_path: String,
    router: Router,
}

impl SignalingServer {
    pub async fn bind(config: &RelayConfig, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(Self {
            listener,
            ws_path: config.ws_path.clone(),
            router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the task is dropped. Each connection runs in
    /// its own task.
    pub async fn run(self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            path = %self.ws_path,
            "Signaling relay listening"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    let router = self.router.clone();
                    let ws_path = self.ws_path.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, remote, ws_path, router).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, remote: SocketAddr, ws_path: String, router: Router) {
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == ws_path {
            return Ok(response);
        }
        let mut rejection = ErrorResponse::new(Some("not found".to_string()));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%remote, "WebSocket upgrade failed: {}", e);
            return;
        }
    };

    let (sink, source) = transport::split(ws);
    let session = ConnectionSession::new(router, source, sink);
    info!(%remote, conn = %session.id(), "Client connected");
    session.run().await;
    debug!(%remote, "Client task finished");
}
