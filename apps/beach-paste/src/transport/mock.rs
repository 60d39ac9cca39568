use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{ChannelError, EngineError, NegotiationEngine, SubChannel};
use crate::config::{Role, SessionConfig};
use crate::session::events::SessionEvents;
use crate::signaling::codec::{DescriptionKind, NegotiationDescription};
use crate::signaling::relay::RelayedCandidate;

const MOCK_SDP: &str = "v=0\r\no=- 0 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\n";

/// In-memory sub-channel that records what was sent on it.
pub struct MockChannel {
    label: String,
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl MockChannel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Simulates the transport going away underneath the channel.
    pub fn close_now(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl SubChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, payload: Bytes) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.label.clone()));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.close_now();
        Ok(())
    }
}

#[derive(Default)]
struct MockState {
    local: Option<NegotiationDescription>,
    remote: Option<NegotiationDescription>,
    gathered: Vec<RelayedCandidate>,
    remote_candidates: Vec<RelayedCandidate>,
    channels: Vec<Arc<MockChannel>>,
    closed: bool,
    fail_next: Option<&'static str>,
}

/// Scripted engine for driving a session without a network.
///
/// Nothing happens on its own: tests call [`discover`](Self::discover),
/// [`open`](Self::open) and [`deliver`](Self::deliver) to play the part
/// of the ICE agent and the remote peer.
pub struct MockEngine {
    events: Arc<SessionEvents>,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new(events: Arc<SessionEvents>) -> Self {
        Self {
            events,
            state: Mutex::new(MockState::default()),
        }
    }

    /// An engine whose callbacks go to a throwaway event sink.
    pub fn detached() -> Self {
        let (events, _streams) = SessionEvents::new(&SessionConfig::new(Role::Offerer));
        Self::new(events)
    }

    pub async fn discover(&self, candidate: RelayedCandidate) {
        self.state.lock().gathered.push(candidate.clone());
        self.events.on_local_candidate(Some(candidate)).await;
    }

    pub async fn finish_gathering(&self) {
        self.events.on_local_candidate(None).await;
    }

    /// Fires the open callback for `label`, creating the channel if the
    /// remote side is the one announcing it.
    pub fn open(&self, label: &str) -> Arc<MockChannel> {
        let channel = self.channel_or_insert(label);
        self.events.on_channel_open(channel.clone());
        channel
    }

    pub async fn deliver(&self, label: &str, payload: Bytes) {
        self.events.on_channel_message(label, payload).await;
    }

    pub fn close_channel(&self, label: &str) {
        if let Some(channel) = self.channel(label) {
            channel.close_now();
        }
        self.events.on_channel_close(label);
    }

    pub fn channel(&self, label: &str) -> Option<Arc<MockChannel>> {
        self.state
            .lock()
            .channels
            .iter()
            .find(|channel| channel.label == label)
            .cloned()
    }

    pub fn remote_candidates(&self) -> Vec<RelayedCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    pub fn remote_description(&self) -> Option<NegotiationDescription> {
        self.state.lock().remote.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Makes the next call to `operation` fail, e.g. `"create_offer"`.
    pub fn fail_next(&self, operation: &'static str) {
        self.state.lock().fail_next = Some(operation);
    }

    fn channel_or_insert(&self, label: &str) -> Arc<MockChannel> {
        let mut state = self.state.lock();
        if let Some(existing) = state.channels.iter().find(|channel| channel.label == label) {
            return existing.clone();
        }
        let channel = Arc::new(MockChannel::new(label));
        state.channels.push(channel.clone());
        channel
    }

    fn check(&self, operation: &'static str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::description(operation, "engine closed"));
        }
        if state.fail_next == Some(operation) {
            state.fail_next = None;
            return Err(EngineError::description(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationEngine for MockEngine {
    async fn create_offer(&self) -> Result<NegotiationDescription, EngineError> {
        self.check("create_offer")?;
        Ok(NegotiationDescription::offer(MOCK_SDP))
    }

    async fn create_answer(&self) -> Result<NegotiationDescription, EngineError> {
        self.check("create_answer")?;
        match &self.state.lock().remote {
            Some(remote) if remote.kind == DescriptionKind::Offer => {
                Ok(NegotiationDescription::answer(MOCK_SDP))
            }
            _ => Err(EngineError::description(
                "create_answer",
                "no remote offer has been applied",
            )),
        }
    }

    async fn set_local_description(
        &self,
        description: NegotiationDescription,
    ) -> Result<(), EngineError> {
        self.check("set_local_description")?;
        self.state.lock().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: NegotiationDescription,
    ) -> Result<(), EngineError> {
        self.check("set_remote_description")?;
        self.state.lock().remote = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<NegotiationDescription> {
        let state = self.state.lock();
        let mut local = state.local.clone()?;
        for candidate in &state.gathered {
            local.sdp.push_str("a=");
            local.sdp.push_str(&candidate.candidate);
            local.sdp.push_str("\r\n");
        }
        Some(local)
    }

    async fn open_channel(&self, label: &str) -> Result<Arc<dyn SubChannel>, EngineError> {
        if self.state.lock().closed {
            return Err(EngineError::Channel {
                label: label.to_string(),
                reason: "engine closed".to_string(),
            });
        }
        Ok(self.channel_or_insert(label))
    }

    async fn add_remote_candidate(&self, candidate: RelayedCandidate) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::Candidate("engine closed".to_string()));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.closed = true;
        for channel in &state.channels {
            channel.close_now();
        }
        Ok(())
    }
}
