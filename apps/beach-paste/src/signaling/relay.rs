use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::gate::ReadinessGate;
use crate::transport::{NegotiationEngine, SubChannel};

/// Wire form of a trickled ICE candidate, matching the browser `toJSON()` shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl RelayedCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, RelayDecodeError> {
        let candidate: RelayedCandidate =
            serde_json::from_slice(payload).map_err(|source| RelayDecodeError {
                len: payload.len(),
                source,
            })?;
        Ok(candidate)
    }
}

#[derive(Debug, Error)]
#[error("malformed relay message ({len} bytes): {source}")]
pub struct RelayDecodeError {
    pub len: usize,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalCandidateOutcome {
    EndOfCandidates,
    DroppedBeforeOpen,
    Relayed,
    SendFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub relayed: u64,
    pub dropped_before_open: u64,
    pub applied: u64,
    pub rejected: u64,
    /// Local candidates that could not be encoded or sent after the relay opened.
    pub failed: u64,
}

/// Forwards locally discovered candidates over the relay sub-channel and
/// applies candidates received from the peer.
pub struct CandidateRelay {
    gate: Arc<ReadinessGate>,
    channel: Mutex<Option<Arc<dyn SubChannel>>>,
    relayed: AtomicU64,
    dropped: AtomicU64,
    applied: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

impl CandidateRelay {
    pub fn new(gate: Arc<ReadinessGate>) -> Self {
        Self {
            gate,
            channel: Mutex::new(None),
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub async fn on_local_candidate(
        &self,
        candidate: Option<RelayedCandidate>,
    ) -> LocalCandidateOutcome {
        let Some(candidate) = candidate else {
            tracing::debug!(target = "webrtc", "end of local candidates");
            return LocalCandidateOutcome::EndOfCandidates;
        };

        if self.gate.first_candidate.set() {
            tracing::debug!(target = "webrtc", candidate = %candidate.candidate, "first local candidate found");
        }

        if !self.gate.relay_open.is_set() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                target = "webrtc",
                candidate = %candidate.candidate,
                "relay not open; candidate left to the exported description"
            );
            return LocalCandidateOutcome::DroppedBeforeOpen;
        }

        // The slot is filled before the latch fires; it is only empty again after close.
        let channel = self.channel.lock().clone();
        let Some(channel) = channel else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return LocalCandidateOutcome::DroppedBeforeOpen;
        };

        let payload = match candidate.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target = "webrtc", error = %err, "failed to encode local candidate");
                return LocalCandidateOutcome::SendFailed;
            }
        };

        match channel.send(payload).await {
            Ok(()) => {
                self.relayed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target = "webrtc", candidate = %candidate.candidate, "relayed local candidate");
                LocalCandidateOutcome::Relayed
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target = "webrtc", error = %err, "failed to relay local candidate");
                LocalCandidateOutcome::SendFailed
            }
        }
    }

    pub fn on_relay_open(&self, channel: Arc<dyn SubChannel>) {
        tracing::debug!(target = "webrtc", label = channel.label(), "relay channel open");
        self.channel.lock().replace(channel);
        self.gate.relay_open.set();
    }

    /// Decodes one relay message and hands the candidate to the engine.
    ///
    /// Malformed messages are counted and returned as errors for the caller
    /// to log; they never tear down the relay.
    pub async fn apply_remote(
        &self,
        engine: &dyn NegotiationEngine,
        payload: &[u8],
    ) -> Result<(), RelayDecodeError> {
        let candidate = match RelayedCandidate::from_bytes(payload) {
            Ok(candidate) => candidate,
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        tracing::debug!(target = "webrtc", candidate = %candidate.candidate, "applying remote candidate");
        match engine.add_remote_candidate(candidate).await {
            Ok(()) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!(target = "webrtc", error = %err, "failed to add remote ice candidate");
            }
        }
        Ok(())
    }

    pub fn detach(&self) -> Option<Arc<dyn SubChannel>> {
        self.channel.lock().take()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            relayed: self.relayed.load(Ordering::Relaxed),
            dropped_before_open: self.dropped.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockChannel, MockEngine};

    fn relay() -> (Arc<ReadinessGate>, CandidateRelay) {
        let gate = Arc::new(ReadinessGate::new());
        let relay = CandidateRelay::new(gate.clone());
        (gate, relay)
    }

    #[test]
    fn candidate_json_matches_browser_shape() {
        let candidate = RelayedCandidate::new("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host");
        let value: serde_json::Value = serde_json::from_slice(&candidate.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": null,
            })
        );
        let parsed = RelayedCandidate::from_bytes(br#"{"candidate":"candidate:2"}"#).unwrap();
        assert_eq!(parsed.sdp_mid, None);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn end_of_candidates_sentinel_is_ignored() {
        let (gate, relay) = relay();
        let outcome = relay.on_local_candidate(None).await;
        assert_eq!(outcome, LocalCandidateOutcome::EndOfCandidates);
        assert!(!gate.first_candidate.is_set());
        assert_eq!(relay.stats(), RelayStats::default());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn candidates_before_open_are_dropped_and_after_open_sent_once() {
        let (gate, relay) = relay();
        let channel = Arc::new(MockChannel::new("candidates"));

        let early = RelayedCandidate::new("candidate:early");
        assert_eq!(
            relay.on_local_candidate(Some(early)).await,
            LocalCandidateOutcome::DroppedBeforeOpen
        );
        assert!(gate.first_candidate.is_set());

        relay.on_relay_open(channel.clone());
        assert!(gate.relay_open.is_set());
        assert!(channel.sent().is_empty(), "dropped candidates are not replayed");

        let late = RelayedCandidate::new("candidate:late");
        assert_eq!(
            relay.on_local_candidate(Some(late.clone())).await,
            LocalCandidateOutcome::Relayed
        );

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(RelayedCandidate::from_bytes(&sent[0]).unwrap(), late);
        assert_eq!(relay.stats().relayed, 1);
        assert_eq!(relay.stats().dropped_before_open, 1);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn send_failure_is_reported_but_not_fatal() {
        let (_gate, relay) = relay();
        let channel = Arc::new(MockChannel::new("candidates"));
        relay.on_relay_open(channel.clone());
        channel.close_now();

        let outcome = relay
            .on_local_candidate(Some(RelayedCandidate::new("candidate:x")))
            .await;
        assert_eq!(outcome, LocalCandidateOutcome::SendFailed);
        let stats = relay.stats();
        assert_eq!(stats.relayed, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dropped_before_open, 0);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn malformed_remote_message_is_rejected_and_later_ones_apply() {
        let (_gate, relay) = relay();
        let engine = MockEngine::detached();

        let err = relay.apply_remote(&engine, b"{\"candidate\": 12").await.unwrap_err();
        assert_eq!(err.len, 16);

        let good = RelayedCandidate::new("candidate:remote");
        relay.apply_remote(&engine, &good.to_bytes().unwrap()).await.expect("valid candidate");

        assert_eq!(engine.remote_candidates(), vec![good]);
        let stats = relay.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.applied, 1);
    }
}
