use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use webrtc::util::vnet::net::{Net, NetConfig};
use webrtc::util::vnet::router::{Router, RouterConfig};

use super::to_setup_error;
use crate::transport::EngineError;

/// In-process virtual LAN so two engines can connect without OS networking.
///
/// Attach every host before calling [`start`](Self::start).
pub struct VirtualLan {
    router: Arc<AsyncMutex<Router>>,
}

impl VirtualLan {
    pub fn new(cidr: &str) -> Result<Self, EngineError> {
        let router = Router::new(RouterConfig {
            cidr: cidr.to_owned(),
            ..Default::default()
        })
        .map_err(to_setup_error)?;
        Ok(Self {
            router: Arc::new(AsyncMutex::new(router)),
        })
    }

    pub async fn attach(&self, static_ip: &str) -> Result<Arc<Net>, EngineError> {
        let net = Arc::new(Net::new(Some(NetConfig {
            static_ips: vec![static_ip.to_owned()],
            ..Default::default()
        })));

        let nic = net.get_nic().map_err(to_setup_error)?;
        {
            let mut router = self.router.lock().await;
            router
                .add_net(Arc::clone(&nic))
                .await
                .map_err(to_setup_error)?;
        }
        {
            let nic = nic.lock().await;
            nic.set_router(Arc::clone(&self.router))
                .await
                .map_err(to_setup_error)?;
        }
        tracing::trace!(target = "beach_paste::transport::webrtc", ip = static_ip, "attached host to virtual lan");
        Ok(net)
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        let mut router = self.router.lock().await;
        router.start().await.map_err(to_setup_error)
    }

    pub async fn stop(&self) {
        let mut router = self.router.lock().await;
        if let Err(err) = router.stop().await {
            tracing::debug!(target = "beach_paste::transport::webrtc", error = %err, "virtual lan stop failed");
        }
    }
}
