use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::signaling::codec::NegotiationDescription;
use crate::signaling::relay::RelayedCandidate;

pub mod mock;
pub mod webrtc;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("{operation} failed: {reason}")]
    Description {
        operation: &'static str,
        reason: String,
    },
    #[error("failed to open sub-channel '{label}': {reason}")]
    Channel { label: String, reason: String },
    #[error("failed to apply remote candidate: {0}")]
    Candidate(String),
    #[error("failed to close peer connection: {0}")]
    Close(String),
}

impl EngineError {
    pub fn description<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        EngineError::Description {
            operation,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("sub-channel '{0}' is closed")]
    Closed(String),
    #[error("send on sub-channel '{label}' failed: {reason}")]
    Send { label: String, reason: String },
}

/// A labelled, reliable, ordered stream multiplexed over the peer connection.
#[async_trait]
pub trait SubChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send(&self, payload: Bytes) -> Result<(), ChannelError>;

    async fn close(&self) -> Result<(), ChannelError>;
}

/// The negotiation engine as seen by the signaling layer.
///
/// Implementations report callbacks (candidates, channel lifecycle, inbound
/// messages) to the [`SessionEvents`](crate::session::events::SessionEvents)
/// they were built with; the methods here are the operations the session
/// invokes on the engine.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<NegotiationDescription, EngineError>;

    async fn create_answer(&self) -> Result<NegotiationDescription, EngineError>;

    async fn set_local_description(
        &self,
        description: NegotiationDescription,
    ) -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        description: NegotiationDescription,
    ) -> Result<(), EngineError>;

    /// Current local description with the candidates gathered so far embedded.
    async fn local_description(&self) -> Option<NegotiationDescription>;

    async fn open_channel(&self, label: &str) -> Result<Arc<dyn SubChannel>, EngineError>;

    async fn add_remote_candidate(&self, candidate: RelayedCandidate) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}
