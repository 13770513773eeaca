use crate::engine::{
    CandidateHandler, DisconnectHandler, EngineFactory, IceCandidate, NegotiationEngine,
    SessionDescription,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Builds one `RTCPeerConnection` per joined peer.
pub struct WebRtcEngineFactory {
    ice_servers: Vec<String>,
}

impl WebRtcEngineFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(&self) -> Result<Arc<dyn NegotiationEngine>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);
        Ok(Arc::new(WebRtcEngine { peer_connection }))
    }
}

pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
}

fn is_terminal(state: RTCPeerConnectionState) -> bool {
    matches!(
        state,
        RTCPeerConnectionState::Disconnected
            | RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Closed
    )
}

// Both shapes serialize as {"type", "sdp"}, so serde does the mapping.
fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(serde_json::from_value(serde_json::to_value(desc)?)?)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    Ok(serde_json::from_value(serde_json::to_value(desc)?)?)
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(c: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(desc)?)
            .await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }

    fn on_local_candidate(&self, handler: CandidateHandler) {
        self.peer_connection.on_ice_candidate(Box::new(
            move |candidate: Option<RTCIceCandidate>| -> BoxFuture<'static, ()> {
                // None marks the end of gathering.
                let Some(candidate) = candidate else {
                    return Box::pin(async {});
                };
                match candidate.to_json() {
                    Ok(init) => handler(init.into()),
                    Err(e) => {
                        warn!("Failed to serialize local ICE candidate: {}", e);
                        Box::pin(async {})
                    }
                }
            },
        ));
    }

    fn on_disconnected(&self, handler: DisconnectHandler) {
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| -> BoxFuture<'static, ()> {
                debug!("Peer connection state has changed: {}", state);
                if is_terminal(state) {
                    // Cleanup closes this very connection; run it off the callback.
                    tokio::spawn(handler());
                }
                Box::pin(async {})
            },
        ));
    }
}
