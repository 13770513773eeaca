//! Boundary to the component that does the actual SDP/ICE work.
//!
//! The relay never looks inside a description or candidate; it only moves
//! them between the wire and whichever engine a peer was given at join time.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Browser `RTCSessionDescriptionInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// Browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

pub type CandidateHandler = Box<dyn Fn(IceCandidate) -> BoxFuture<'static, ()> + Send + Sync>;
pub type DisconnectHandler = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One negotiation engine instance, owned by exactly one joined peer.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Called for every locally gathered candidate.
    fn on_local_candidate(&self, handler: CandidateHandler);

    /// Called when the connection reaches a terminal state.
    fn on_disconnected(&self, handler: DisconnectHandler);
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn NegotiationEngine>>;
}
