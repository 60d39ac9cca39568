//! The signaling session: drives one offer/answer exchange through the
//! engine, the pasted-text console and the readiness latches, then hands
//! over to the application data loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ReadinessPolicy, Role, SessionConfig};
use crate::signaling::codec::{self, CodecError, DescriptionKind, NegotiationDescription};
use crate::signaling::gate::{Latch, WaitTimeout};
use crate::signaling::relay::RelayStats;
use crate::transport::{ChannelError, EngineError, NegotiationEngine, SubChannel};

pub mod events;
pub mod io;

use events::{EventStreams, SessionEvents};
use io::LineIo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LocalDescriptionCreating,
    LocalDescriptionSet,
    AwaitingReadiness,
    DescriptionExported,
    AwaitingRemoteText,
    RemoteDescriptionSet,
    AwaitingDataChannel,
    Streaming,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("description codec error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("console i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("input closed while {stage}")]
    InputClosed { stage: &'static str },
    #[error("{stage}: {source}")]
    Timeout {
        stage: &'static str,
        #[source]
        source: WaitTimeout,
    },
    #[error("engine produced no local description to export")]
    MissingLocalDescription,
    #[error("pasted description is an {found}, expected an {expected}")]
    UnexpectedDescription {
        expected: DescriptionKind,
        found: DescriptionKind,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub role: Role,
    pub final_state: SessionState,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub relay: RelayStats,
}

pub struct Session {
    config: SessionConfig,
    engine: Arc<dyn NegotiationEngine>,
    events: Arc<SessionEvents>,
    data_rx: Option<mpsc::Receiver<Bytes>>,
    relay_pump: Option<JoinHandle<()>>,
    data_channel: Option<Arc<dyn SubChannel>>,
    relay_channel: Option<Arc<dyn SubChannel>>,
    state: SessionState,
    messages_sent: u64,
    messages_received: u64,
}

impl Session {
    /// `engine` must have been built around `events`; `streams` are the
    /// queues returned alongside them.
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn NegotiationEngine>,
        events: Arc<SessionEvents>,
        streams: EventStreams,
    ) -> Self {
        let EventStreams { relay_rx, data_rx } = streams;
        let relay_pump = spawn_relay_pump(engine.clone(), events.clone(), relay_rx);
        // The offerer only sends; leaving its inbound queue unconsumed would
        // eventually stall the engine's read loop.
        let data_rx = match config.role {
            Role::Offerer => None,
            Role::Answerer => Some(data_rx),
        };
        Self {
            config,
            engine,
            events,
            data_rx,
            relay_pump: Some(relay_pump),
            data_channel: None,
            relay_channel: None,
            state: SessionState::Idle,
            messages_sent: 0,
            messages_received: 0,
        }
    }

    /// Runs the exchange to completion. Channels and the peer connection are
    /// closed before this returns, whatever the outcome.
    pub async fn run<I>(mut self, io: &mut I) -> Result<SessionSummary, SessionError>
    where
        I: LineIo + ?Sized,
    {
        let result = self.drive(io).await;
        if let Err(err) = &result {
            tracing::error!(
                target = "beach_paste::session",
                role = %self.config.role,
                state = ?self.state,
                error = %err,
                "session failed"
            );
        }
        self.shutdown().await;
        result.map(|()| self.summary())
    }

    async fn drive<I>(&mut self, io: &mut I) -> Result<(), SessionError>
    where
        I: LineIo + ?Sized,
    {
        match self.config.role {
            Role::Offerer => self.negotiate_as_offerer(io).await?,
            Role::Answerer => self.negotiate_as_answerer(io).await?,
        }

        self.transition(SessionState::AwaitingDataChannel);
        let gate = self.events.gate().clone();
        self.wait_for(&gate.data_open, "waiting for the data channel")
            .await?;
        if let Some(parked) = self.events.take_data_channel() {
            self.data_channel.get_or_insert(parked);
        }
        io.prompt("Connected.").await?;

        self.transition(SessionState::Streaming);
        match self.config.role {
            Role::Offerer => self.stream_outbound(io).await,
            Role::Answerer => self.stream_inbound(io).await,
        }
    }

    async fn negotiate_as_offerer<I>(&mut self, io: &mut I) -> Result<(), SessionError>
    where
        I: LineIo + ?Sized,
    {
        self.transition(SessionState::LocalDescriptionCreating);
        // Channels first, so the offer advertises the SCTP application section.
        let data = self.engine.open_channel(&self.config.data_label).await?;
        self.data_channel = Some(data);
        let relay = self.engine.open_channel(&self.config.relay_label).await?;
        self.relay_channel = Some(relay);

        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer).await?;
        self.transition(SessionState::LocalDescriptionSet);

        self.export_local_description(io).await?;

        self.transition(SessionState::AwaitingRemoteText);
        let answer = self
            .read_remote_description(io, DescriptionKind::Answer)
            .await?;
        self.engine.set_remote_description(answer).await?;
        self.transition(SessionState::RemoteDescriptionSet);
        Ok(())
    }

    async fn negotiate_as_answerer<I>(&mut self, io: &mut I) -> Result<(), SessionError>
    where
        I: LineIo + ?Sized,
    {
        self.transition(SessionState::AwaitingRemoteText);
        let offer = self
            .read_remote_description(io, DescriptionKind::Offer)
            .await?;
        self.engine.set_remote_description(offer).await?;
        self.transition(SessionState::RemoteDescriptionSet);

        self.transition(SessionState::LocalDescriptionCreating);
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer).await?;
        self.transition(SessionState::LocalDescriptionSet);

        self.export_local_description(io).await
    }

    async fn export_local_description<I>(&mut self, io: &mut I) -> Result<(), SessionError>
    where
        I: LineIo + ?Sized,
    {
        self.transition(SessionState::AwaitingReadiness);
        let gate = self.events.gate().clone();
        let latch = match self.config.readiness {
            ReadinessPolicy::FirstCandidate => &gate.first_candidate,
            ReadinessPolicy::GatheringComplete => &gate.gathering_complete,
        };
        self.wait_for(latch, "waiting for local candidates").await?;

        let local = self
            .engine
            .local_description()
            .await
            .ok_or(SessionError::MissingLocalDescription)?;
        let text = codec::encode(&local)?;
        tracing::debug!(
            target = "beach_paste::session",
            kind = %local.kind,
            candidates = local.embedded_candidates().count(),
            encoded_len = text.len(),
            "exporting local description"
        );

        io.prompt(&format!("Send this {} to your peer:", local.kind))
            .await?;
        io.write_line(&text).await?;
        self.transition(SessionState::DescriptionExported);
        Ok(())
    }

    async fn read_remote_description<I>(
        &mut self,
        io: &mut I,
        expected: DescriptionKind,
    ) -> Result<NegotiationDescription, SessionError>
    where
        I: LineIo + ?Sized,
    {
        const STAGE: &str = "waiting for the remote description";

        io.prompt(&format!("Paste the peer's {expected}:")).await?;
        let line = loop {
            let next = match self.config.wait_timeout {
                None => io.read_line().await?,
                Some(limit) => tokio::time::timeout(limit, io.read_line())
                    .await
                    .map_err(|_| remote_text_timeout(limit))??,
            };
            match next {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
                None => return Err(SessionError::InputClosed { stage: STAGE }),
            }
        };

        let description = codec::decode(&line).inspect_err(|err| {
            tracing::error!(
                target = "beach_paste::session",
                stage = err.stage(),
                error = %err,
                "rejected pasted description"
            );
        })?;
        if description.kind != expected {
            return Err(SessionError::UnexpectedDescription {
                expected,
                found: description.kind,
            });
        }
        tracing::debug!(
            target = "beach_paste::session",
            kind = %description.kind,
            candidates = description.embedded_candidates().count(),
            "accepted remote description"
        );
        Ok(description)
    }

    async fn stream_outbound<I>(&mut self, io: &mut I) -> Result<(), SessionError>
    where
        I: LineIo + ?Sized,
    {
        let channel = self
            .data_channel
            .clone()
            .ok_or_else(|| ChannelError::Closed(self.config.data_label.clone()))?;
        while let Some(line) = io.read_line().await? {
            if line.is_empty() {
                continue;
            }
            channel.send(Bytes::from(line.into_bytes())).await?;
            self.messages_sent += 1;
            tracing::trace!(target = "beach_paste::session", sent = self.messages_sent, "sent message");
        }
        tracing::debug!(target = "beach_paste::session", "end of input");
        Ok(())
    }

    async fn stream_inbound<I>(&mut self, io: &mut I) -> Result<(), SessionError>
    where
        I: LineIo + ?Sized,
    {
        let Some(mut inbound) = self.data_rx.take() else {
            return Ok(());
        };
        while let Some(payload) = inbound.recv().await {
            self.messages_received += 1;
            io.write_line(&String::from_utf8_lossy(&payload)).await?;
        }
        tracing::debug!(target = "beach_paste::session", "data channel closed by peer");
        Ok(())
    }

    async fn wait_for(&self, latch: &Latch, stage: &'static str) -> Result<(), SessionError> {
        tracing::trace!(target = "beach_paste::session", latch = latch.name(), state = "start", "await");
        latch
            .wait_timeout(self.config.wait_timeout)
            .await
            .map_err(|source| SessionError::Timeout { stage, source })?;
        tracing::trace!(target = "beach_paste::session", latch = latch.name(), state = "end", "await");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.transition(SessionState::Closed);
        if let Some(pump) = self.relay_pump.take() {
            pump.abort();
        }

        let mut channels: Vec<Arc<dyn SubChannel>> = Vec::new();
        let owned = [
            self.data_channel.take(),
            self.relay_channel.take(),
            self.events.take_data_channel(),
            self.events.relay().detach(),
        ];
        for channel in owned.into_iter().flatten() {
            if !channels.iter().any(|known| known.label() == channel.label()) {
                channels.push(channel);
            }
        }
        for channel in channels {
            if let Err(err) = channel.close().await {
                tracing::warn!(target = "webrtc", label = channel.label(), error = %err, "failed to close sub-channel");
            }
        }
        if let Err(err) = self.engine.close().await {
            tracing::warn!(target = "webrtc", error = %err, "failed to close peer connection");
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            target = "beach_paste::session",
            role = %self.config.role,
            from = ?self.state,
            to = ?next,
            "state transition"
        );
        self.state = next;
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            role: self.config.role,
            final_state: self.state,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            relay: self.events.relay().stats(),
        }
    }
}

fn remote_text_timeout(limit: Duration) -> SessionError {
    SessionError::Timeout {
        stage: "waiting for the remote description",
        source: WaitTimeout {
            signal: "remote_text",
            waited: limit,
        },
    }
}

/// Applies relayed remote candidates in arrival order until the queue closes.
fn spawn_relay_pump(
    engine: Arc<dyn NegotiationEngine>,
    events: Arc<SessionEvents>,
    mut relay_rx: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = relay_rx.recv().await {
            if let Err(err) = events.relay().apply_remote(engine.as_ref(), &payload).await {
                tracing::warn!(target = "webrtc", error = %err, "dropping malformed relay message");
            }
        }
    })
}
