use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("envelope has no payload")]
    MissingPayload,

    /// The remote end closed the channel.
    #[error("connection closed")]
    Closed,

    #[error("negotiation engine timed out during {0}")]
    EngineTimeout(&'static str),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
