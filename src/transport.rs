//! Duplex text channel between the relay and one client.

use crate::error::{RelayError, Result};
use crate::signaling::Envelope;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
}

#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, or `RelayError::Closed` once the peer hangs up.
    async fn receive(&mut self) -> Result<String>;
}

pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

pub struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

pub fn split<S>(ws: WebSocketStream<S>) -> (WsSink<S>, WsSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (inner_sink, inner_stream) = ws.split();
    (
        WsSink { inner: inner_sink },
        WsSource {
            inner: inner_stream,
        },
    )
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }
}

#[async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<String> {
        loop {
            match self.inner.next().await {
                None => return Err(RelayError::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        warn!("Dropping binary frame that is not UTF-8: {}", e);
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close frame received: {:?}", frame);
                    return Err(RelayError::Closed);
                }
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Outbound half of a connection, shared by the session and the peer handle.
/// At most one frame is being written at any time.
#[derive(Clone)]
pub struct PeerChannel {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
}

impl PeerChannel {
    pub fn new(sink: impl FrameSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.encode()?;
        self.sink.lock().await.send_text(text).await
    }
}
