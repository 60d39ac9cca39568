use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{ChannelError, EngineError, NegotiationEngine, SubChannel};
use crate::session::events::SessionEvents;
use crate::signaling::codec::{DescriptionKind, NegotiationDescription};
use crate::signaling::relay::RelayedCandidate;

pub mod config;
pub mod vnet;

pub use config::{IceTimeouts, WebRtcConfig, WebRtcConfigBuilder};
pub use vnet::VirtualLan;

const TRACE_TARGET: &str = "beach_paste::transport::webrtc";

fn build_api(setting: SettingEngine) -> Result<API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

pub(crate) fn to_setup_error<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Setup(err.to_string())
}

/// [`NegotiationEngine`] backed by a webrtc-rs peer connection.
///
/// Engine callbacks are forwarded to the [`SessionEvents`] the engine was
/// built with; none of them call back into the peer connection.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    events: Arc<SessionEvents>,
    ordered: bool,
}

impl WebRtcEngine {
    pub async fn new(config: WebRtcConfig, events: Arc<SessionEvents>) -> Result<Self, EngineError> {
        let WebRtcConfig {
            ice_servers,
            ordered,
            ice_timeouts,
            vnet,
        } = config;

        let mut setting = SettingEngine::default();
        setting.set_ice_timeouts(
            Some(ice_timeouts.disconnected),
            Some(ice_timeouts.failed),
            Some(ice_timeouts.keepalive),
        );
        if let Some(net) = vnet {
            setting.set_vnet(Some(net));
        }
        let api = build_api(setting)?;

        tracing::trace!(target = TRACE_TARGET, await = "api.new_peer_connection", state = "start");
        let pc_result = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await;
        tracing::trace!(
            target = TRACE_TARGET,
            await = "api.new_peer_connection",
            state = "end",
            ok = pc_result.is_ok()
        );
        let pc = Arc::new(pc_result.map_err(to_setup_error)?);

        register_peer_handlers(&pc, &events);
        Ok(Self {
            pc,
            events,
            ordered,
        })
    }
}

fn register_peer_handlers(pc: &Arc<RTCPeerConnection>, events: &Arc<SessionEvents>) {
    let candidate_events = Arc::clone(events);
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = Arc::clone(&candidate_events);
        Box::pin(async move {
            match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => {
                        events
                            .on_local_candidate(Some(relayed_from_init(init)))
                            .await
                    }
                    Err(err) => {
                        tracing::warn!(target = "webrtc", error = %err, "failed to serialize local candidate")
                    }
                },
                None => events.on_local_candidate(None).await,
            }
        })
    }));

    let state_events = Arc::clone(events);
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        state_events.on_connection_state(&state);
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        tracing::debug!(target = "webrtc", state = %state, "peer connection state changed");
        Box::pin(async {})
    }));

    let channel_events = Arc::clone(events);
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = Arc::clone(&channel_events);
        Box::pin(async move {
            tracing::debug!(target = "webrtc", label = dc.label(), "remote announced sub-channel");
            attach_channel_handlers(dc, events);
        })
    }));
}

fn attach_channel_handlers(dc: Arc<RTCDataChannel>, events: Arc<SessionEvents>) {
    let label = dc.label().to_string();

    let open_events = Arc::clone(&events);
    let open_dc = Arc::clone(&dc);
    dc.on_open(Box::new(move || {
        let events = Arc::clone(&open_events);
        let dc = Arc::clone(&open_dc);
        Box::pin(async move {
            events.on_channel_open(Arc::new(WebRtcChannel::new(dc)));
        })
    }));

    let message_events = Arc::clone(&events);
    let message_label = label.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = Arc::clone(&message_events);
        let label = message_label.clone();
        Box::pin(async move {
            events.on_channel_message(&label, msg.data).await;
        })
    }));

    let error_label = label.clone();
    dc.on_error(Box::new(move |err| {
        let label = error_label.clone();
        Box::pin(async move {
            tracing::warn!(target = "webrtc", label = %label, error = %err, "sub-channel error");
        })
    }));

    dc.on_close(Box::new(move || {
        let events = Arc::clone(&events);
        let label = label.clone();
        Box::pin(async move {
            events.on_channel_close(&label);
        })
    }));
}

struct WebRtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self {
            label: dc.label().to_string(),
            dc,
        }
    }
}

#[async_trait]
impl SubChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, payload: Bytes) -> Result<(), ChannelError> {
        let len = payload.len();
        self.dc
            .send(&payload)
            .await
            .map_err(|err| ChannelError::Send {
                label: self.label.clone(),
                reason: err.to_string(),
            })?;
        tracing::trace!(target = "webrtc", label = %self.label, len, "sent on sub-channel");
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.dc
            .close()
            .await
            .map_err(|err| ChannelError::Send {
                label: self.label.clone(),
                reason: err.to_string(),
            })
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<NegotiationDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| EngineError::description("create_offer", err))?;
        description_from_rtc(offer.sdp_type, offer.sdp)
    }

    async fn create_answer(&self) -> Result<NegotiationDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| EngineError::description("create_answer", err))?;
        description_from_rtc(answer.sdp_type, answer.sdp)
    }

    async fn set_local_description(
        &self,
        description: NegotiationDescription,
    ) -> Result<(), EngineError> {
        let rtc = description_to_rtc(description)?;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(|err| EngineError::description("set_local_description", err))
    }

    async fn set_remote_description(
        &self,
        description: NegotiationDescription,
    ) -> Result<(), EngineError> {
        let rtc = description_to_rtc(description)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|err| EngineError::description("set_remote_description", err))
    }

    async fn local_description(&self) -> Option<NegotiationDescription> {
        let local = self.pc.local_description().await?;
        match description_from_rtc(local.sdp_type, local.sdp) {
            Ok(description) => Some(description),
            Err(err) => {
                tracing::warn!(target = "webrtc", error = %err, "unusable local description");
                None
            }
        }
    }

    async fn open_channel(&self, label: &str) -> Result<Arc<dyn SubChannel>, EngineError> {
        let init = RTCDataChannelInit {
            ordered: Some(self.ordered),
            ..Default::default()
        };
        tracing::trace!(target = TRACE_TARGET, label, await = "pc.create_data_channel", state = "start");
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| EngineError::Channel {
                label: label.to_string(),
                reason: err.to_string(),
            })?;
        tracing::trace!(target = TRACE_TARGET, label, await = "pc.create_data_channel", state = "end");

        attach_channel_handlers(Arc::clone(&dc), Arc::clone(&self.events));
        Ok(Arc::new(WebRtcChannel::new(dc)))
    }

    async fn add_remote_candidate(&self, candidate: RelayedCandidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| EngineError::Candidate(err.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|err| EngineError::Close(err.to_string()))
    }
}

fn relayed_from_init(init: RTCIceCandidateInit) -> RelayedCandidate {
    RelayedCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn description_to_rtc(
    description: NegotiationDescription,
) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp),
        DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|err| EngineError::description("parse session description", err))
}

fn description_from_rtc(
    sdp_type: RTCSdpType,
    sdp: String,
) -> Result<NegotiationDescription, EngineError> {
    match sdp_type {
        RTCSdpType::Offer => Ok(NegotiationDescription::offer(sdp)),
        RTCSdpType::Answer => Ok(NegotiationDescription::answer(sdp)),
        other => Err(EngineError::description(
            "read session description",
            format!("unsupported description type {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_init_maps_field_for_field() {
        let init = RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some("ufrag".to_string()),
        };
        let relayed = relayed_from_init(init);
        assert_eq!(relayed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(relayed.sdp_mline_index, Some(0));
        assert_eq!(relayed.username_fragment.as_deref(), Some("ufrag"));
    }

    #[test]
    fn pranswer_is_not_exported() {
        let err = description_from_rtc(RTCSdpType::Pranswer, "v=0\r\n".to_string())
            .expect_err("pranswer has no wire kind");
        assert!(err.to_string().contains("unsupported description type"));

        let offer = description_from_rtc(RTCSdpType::Offer, "v=0\r\n".to_string())
            .expect("offers map across");
        assert_eq!(offer.kind, DescriptionKind::Offer);
        assert_eq!(offer.sdp, "v=0\r\n");
    }
}
