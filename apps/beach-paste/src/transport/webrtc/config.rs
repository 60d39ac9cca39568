use std::sync::Arc;
use std::time::Duration;

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::util::vnet::net::Net;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
/// Env switch backing `--no-stun`.
pub const LOCALHOST_ONLY_ENV: &str = "BEACH_PASTE_LOCALHOST_ONLY";

/// ICE agent timeouts handed to the setting engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IceTimeouts {
    pub disconnected: Duration,
    pub failed: Duration,
    pub keepalive: Duration,
}

impl Default for IceTimeouts {
    fn default() -> Self {
        Self {
            disconnected: Duration::from_secs(3),
            failed: Duration::from_secs(10),
            keepalive: Duration::from_millis(500),
        }
    }
}

/// Configuration for the webrtc-rs engine
#[derive(Clone)]
pub struct WebRtcConfig {
    /// ICE servers used for server-reflexive discovery; empty means host candidates only
    pub ice_servers: Vec<RTCIceServer>,
    /// Whether sub-channels deliver in order
    pub ordered: bool,
    pub ice_timeouts: IceTimeouts,
    /// Virtual network for in-process tests
    pub vnet: Option<Arc<Net>>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![RTCIceServer {
                urls: vec![DEFAULT_STUN_SERVER.to_string()],
                ..Default::default()
            }],
            ordered: true,
            ice_timeouts: IceTimeouts::default(),
            vnet: None,
        }
    }
}

impl WebRtcConfig {
    /// Create a localhost-only configuration (no STUN/TURN)
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> WebRtcConfigBuilder {
        WebRtcConfigBuilder::new()
    }
}

/// Builder for [`WebRtcConfig`]
#[derive(Default)]
pub struct WebRtcConfigBuilder {
    ice_servers: Vec<RTCIceServer>,
    ordered: Option<bool>,
    ice_timeouts: Option<IceTimeouts>,
    vnet: Option<Arc<Net>>,
}

impl WebRtcConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            ..Default::default()
        });
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn ice_timeouts(mut self, timeouts: IceTimeouts) -> Self {
        self.ice_timeouts = Some(timeouts);
        self
    }

    pub fn vnet(mut self, net: Arc<Net>) -> Self {
        self.vnet = Some(net);
        self
    }

    /// Servers added here replace the default STUN server; with none added
    /// the engine gathers host candidates only.
    pub fn build(self) -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: self.ice_servers,
            ordered: self.ordered.unwrap_or(true),
            ice_timeouts: self.ice_timeouts.unwrap_or_default(),
            vnet: self.vnet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_public_stun() {
        let config = WebRtcConfig::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert!(config.ordered);
        assert!(config.vnet.is_none());
    }

    #[test]
    fn localhost_has_no_ice_servers() {
        assert!(WebRtcConfig::localhost().ice_servers.is_empty());
    }

    #[test]
    fn builder_collects_servers_in_order() {
        let config = WebRtcConfig::builder()
            .add_ice_server(vec!["stun:one.example:3478".to_string()])
            .add_ice_server(vec!["stun:two.example:3478".to_string()])
            .ordered(false)
            .build();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].urls, vec!["stun:two.example:3478".to_string()]);
        assert!(!config.ordered);
        assert_eq!(config.ice_timeouts, IceTimeouts::default());
    }
}
