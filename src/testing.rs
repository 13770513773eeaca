//! In-memory doubles for the transport and engine boundaries.

use crate::engine::{
    CandidateHandler, DisconnectHandler, EngineFactory, IceCandidate, NegotiationEngine, SdpKind,
    SessionDescription,
};
use crate::error::{RelayError, Result};
use crate::peer::{ConnectionId, PeerHandle};
use crate::signaling::{Envelope, MessageType};
use crate::transport::{FrameSink, FrameSource, PeerChannel};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|text| Envelope::decode(text).unwrap())
            .collect()
    }

    pub fn kinds(&self) -> Vec<MessageType> {
        self.envelopes().into_iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: MessageType) -> Vec<Envelope> {
        self.envelopes()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        self.frames.lock().unwrap().push(text);
        Ok(())
    }
}

/// Feeds frames pushed through the paired sender; dropping the sender closes it.
pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ScriptedSource {
    pub fn new() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn receive(&mut self) -> Result<String> {
        self.rx.recv().await.ok_or(RelayError::Closed)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    remote: Mutex<Vec<SessionDescription>>,
    local: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    candidate_handler: Mutex<Option<CandidateHandler>>,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
    reject_remote: AtomicBool,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().iter().any(|c| c == "close")
    }

    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    pub fn answer_sdp() -> &'static str {
        "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=fake-answer\r\n"
    }

    pub async fn emit_candidate(&self, candidate: IceCandidate) {
        let fut = {
            let handler = self.candidate_handler.lock().unwrap();
            handler.as_ref().map(|h| h(candidate))
        };
        if let Some(fut) = fut {
            fut.await;
        }
    }

    pub async fn emit_disconnect(&self) {
        let fut = {
            let handler = self.disconnect_handler.lock().unwrap();
            handler.as_ref().map(|h| h())
        };
        if let Some(fut) = fut {
            fut.await;
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record("set_remote_description");
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("remote description rejected").into());
        }
        self.remote.lock().unwrap().push(desc);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: Self::answer_sdp().to_string(),
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record("set_local_description");
        self.local.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record("add_ice_candidate");
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }

    fn on_local_candidate(&self, handler: CandidateHandler) {
        *self.candidate_handler.lock().unwrap() = Some(handler);
    }

    fn on_disconnected(&self, handler: DisconnectHandler) {
        *self.disconnect_handler.lock().unwrap() = Some(handler);
    }
}

#[derive(Default)]
pub struct FakeEngineFactory {
    created: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeEngineFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn engine(&self, index: usize) -> Arc<FakeEngine> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    async fn create(&self) -> Result<Arc<dyn NegotiationEngine>> {
        let engine = Arc::new(FakeEngine::default());
        self.created.lock().unwrap().push(engine.clone());
        let engine: Arc<dyn NegotiationEngine> = engine;
        Ok(engine)
    }
}

/// A handle wired to a recording sink and a fresh fake engine.
pub fn peer(peer_id: &str) -> (Arc<PeerHandle>, RecordingSink, Arc<FakeEngine>) {
    let sink = RecordingSink::new();
    let engine = Arc::new(FakeEngine::default());
    let handle = PeerHandle::new(
        peer_id.to_string(),
        ConnectionId::random(),
        PeerChannel::new(sink.clone()),
        engine.clone(),
    );
    (Arc::new(handle), sink, engine)
}
