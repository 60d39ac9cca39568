use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::config::SessionConfig;
use crate::signaling::gate::ReadinessGate;
use crate::signaling::relay::{CandidateRelay, RelayedCandidate};
use crate::transport::SubChannel;

/// Receiving ends of the queues fed by engine callbacks.
pub struct EventStreams {
    pub relay_rx: mpsc::Receiver<Bytes>,
    pub data_rx: mpsc::Receiver<Bytes>,
}

/// Callback sink handed to the engine.
///
/// Every handler here may run concurrently with the others and with the
/// session flow. Handlers only set latches, post to queues, or park channel
/// handles for the session to pick up; they never close anything.
pub struct SessionEvents {
    gate: Arc<ReadinessGate>,
    relay: Arc<CandidateRelay>,
    data_label: String,
    relay_label: String,
    relay_tx: mpsc::Sender<Bytes>,
    connection_states: broadcast::Sender<String>,
    data_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    data_channel: Mutex<Option<Arc<dyn SubChannel>>>,
}

impl SessionEvents {
    pub fn new(config: &SessionConfig) -> (Arc<Self>, EventStreams) {
        let gate = Arc::new(ReadinessGate::new());
        let relay = Arc::new(CandidateRelay::new(gate.clone()));
        let (relay_tx, relay_rx) = mpsc::channel(config.queue_capacity);
        let (data_tx, data_rx) = mpsc::channel(config.queue_capacity);
        let (connection_states, _) = broadcast::channel(16);
        let events = Arc::new(Self {
            gate,
            relay,
            data_label: config.data_label.clone(),
            relay_label: config.relay_label.clone(),
            relay_tx,
            connection_states,
            data_tx: Mutex::new(Some(data_tx)),
            data_channel: Mutex::new(None),
        });
        (events, EventStreams { relay_rx, data_rx })
    }

    pub fn gate(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    pub fn relay(&self) -> &Arc<CandidateRelay> {
        &self.relay
    }

    /// Connection state changes as display strings, from subscription onwards.
    pub fn subscribe_connection_states(&self) -> broadcast::Receiver<String> {
        self.connection_states.subscribe()
    }

    pub fn on_connection_state(&self, state: &dyn fmt::Display) {
        let state = state.to_string();
        tracing::info!(target = "webrtc", state = %state, "ice connection state changed");
        // Nobody listening is fine.
        let _ = self.connection_states.send(state);
    }

    /// `None` is the engine's end-of-candidates marker.
    pub async fn on_local_candidate(&self, candidate: Option<RelayedCandidate>) {
        if candidate.is_none() && self.gate.gathering_complete.set() {
            tracing::debug!(target = "webrtc", "candidate gathering complete");
        }
        self.relay.on_local_candidate(candidate).await;
    }

    pub fn on_channel_open(&self, channel: Arc<dyn SubChannel>) {
        let label = channel.label().to_string();
        if label == self.relay_label {
            self.relay.on_relay_open(channel);
        } else if label == self.data_label {
            tracing::debug!(target = "webrtc", label = %label, "data channel open");
            self.data_channel.lock().replace(channel);
            self.gate.data_open.set();
        } else {
            tracing::warn!(target = "webrtc", label = %label, "ignoring unexpected sub-channel");
        }
    }

    pub async fn on_channel_message(&self, label: &str, payload: Bytes) {
        if label == self.relay_label {
            if self.relay_tx.send(payload).await.is_err() {
                tracing::debug!(target = "webrtc", "relay queue closed; dropping message");
            }
        } else if label == self.data_label {
            let sender = self.data_tx.lock().clone();
            match sender {
                Some(sender) => {
                    if sender.send(payload).await.is_err() {
                        tracing::trace!(target = "webrtc", "no consumer for inbound data");
                    }
                }
                None => tracing::trace!(target = "webrtc", "data channel already closed"),
            }
        } else {
            tracing::warn!(target = "webrtc", label, len = payload.len(), "message on unexpected sub-channel");
        }
    }

    pub fn on_channel_close(&self, label: &str) {
        tracing::debug!(target = "webrtc", label, "sub-channel closed");
        if label == self.data_label {
            // Dropping the sender ends the inbound stream once it drains.
            self.data_tx.lock().take();
        }
    }

    pub fn take_data_channel(&self) -> Option<Arc<dyn SubChannel>> {
        self.data_channel.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::transport::mock::MockChannel;

    #[test_timeout::tokio_timeout_test(10)]
    async fn sentinel_marks_gathering_complete_only() {
        let (events, _streams) = SessionEvents::new(&SessionConfig::new(Role::Answerer));
        events.on_local_candidate(None).await;
        assert!(events.gate().gathering_complete.is_set());
        assert!(!events.gate().first_candidate.is_set());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn messages_are_routed_by_label() {
        let (events, mut streams) = SessionEvents::new(&SessionConfig::new(Role::Answerer));
        events
            .on_channel_message("candidates", Bytes::from_static(b"relay"))
            .await;
        events
            .on_channel_message("data", Bytes::from_static(b"hello"))
            .await;
        events
            .on_channel_message("other", Bytes::from_static(b"ignored"))
            .await;

        assert_eq!(streams.relay_rx.recv().await.unwrap(), Bytes::from_static(b"relay"));
        assert_eq!(streams.data_rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(streams.data_rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn data_close_ends_inbound_stream() {
        let (events, mut streams) = SessionEvents::new(&SessionConfig::new(Role::Answerer));
        events
            .on_channel_message("data", Bytes::from_static(b"last"))
            .await;
        events.on_channel_close("data");
        assert_eq!(streams.data_rx.recv().await.unwrap(), Bytes::from_static(b"last"));
        assert!(streams.data_rx.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn connection_states_reach_subscribers_in_order() {
        let (events, _streams) = SessionEvents::new(&SessionConfig::new(Role::Offerer));
        events.on_connection_state(&"new");
        let mut states = events.subscribe_connection_states();
        events.on_connection_state(&"checking");
        events.on_connection_state(&"connected");
        assert_eq!(states.recv().await.unwrap(), "checking");
        assert_eq!(states.recv().await.unwrap(), "connected");
    }

    #[test_timeout::timeout(5)]
    fn channel_open_latches_matching_signal() {
        let (events, _streams) = SessionEvents::new(&SessionConfig::new(Role::Answerer));
        events.on_channel_open(Arc::new(MockChannel::new("candidates")));
        assert!(events.gate().relay_open.is_set());
        assert!(!events.gate().data_open.is_set());

        events.on_channel_open(Arc::new(MockChannel::new("data")));
        assert!(events.gate().data_open.is_set());
        let parked = events.take_data_channel().expect("data channel parked");
        assert_eq!(parked.label(), "data");
    }
}
