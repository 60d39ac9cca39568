use std::sync::Arc;
use std::time::Duration;

use beach_paste::config::{Role, SessionConfig};
use beach_paste::session::Session;
use beach_paste::session::events::SessionEvents;
use beach_paste::session::io::ChannelIo;
use beach_paste::signaling::codec::{self, DescriptionKind};
use beach_paste::transport::webrtc::{IceTimeouts, VirtualLan, WebRtcConfig, WebRtcEngine};

fn fast_timeouts() -> IceTimeouts {
    IceTimeouts {
        disconnected: Duration::from_secs(1),
        failed: Duration::from_secs(1),
        keepalive: Duration::from_millis(200),
    }
}

#[test_timeout::tokio_timeout_test(60)]
#[ignore = "drives two real webrtc engines over a virtual network"]
async fn offerer_and_answerer_connect_over_virtual_lan() {
    let lan = match VirtualLan::new("10.0.0.0/24") {
        Ok(lan) => lan,
        Err(err) => {
            tracing::trace!(target = "webrtc", error = %err, "skipping loopback test");
            return;
        }
    };
    let offer_net = lan.attach("10.0.0.2").await.expect("attach offerer");
    let answer_net = lan.attach("10.0.0.3").await.expect("attach answerer");
    lan.start().await.expect("start router");

    let wait = Some(Duration::from_secs(20));
    let offer_config = SessionConfig::new(Role::Offerer).with_wait_timeout(wait);
    let answer_config = SessionConfig::new(Role::Answerer).with_wait_timeout(wait);

    let (offer_events, offer_streams) = SessionEvents::new(&offer_config);
    let offer_engine = WebRtcEngine::new(
        WebRtcConfig::builder()
            .vnet(offer_net)
            .ice_timeouts(fast_timeouts())
            .build(),
        offer_events.clone(),
    )
    .await
    .expect("offerer engine");
    let (answer_events, answer_streams) = SessionEvents::new(&answer_config);
    let answer_engine = WebRtcEngine::new(
        WebRtcConfig::builder()
            .vnet(answer_net)
            .ice_timeouts(fast_timeouts())
            .build(),
        answer_events.clone(),
    )
    .await
    .expect("answerer engine");

    let offerer = Session::new(
        offer_config,
        Arc::new(offer_engine),
        offer_events,
        offer_streams,
    );
    let answerer = Session::new(
        answer_config,
        Arc::new(answer_engine),
        answer_events,
        answer_streams,
    );

    let (mut offer_io, mut offer_console) = ChannelIo::pair();
    let (mut answer_io, mut answer_console) = ChannelIo::pair();
    let offer_task = tokio::spawn(async move { offerer.run(&mut offer_io).await });
    let answer_task = tokio::spawn(async move { answerer.run(&mut answer_io).await });

    let offer_text = offer_console.output.recv().await.expect("offer text");
    let offer = codec::decode(&offer_text).expect("offer decodes");
    assert_eq!(offer.kind, DescriptionKind::Offer);
    assert!(offer.embedded_candidates().next().is_some());
    answer_console.input.send(offer_text).unwrap();

    let answer_text = answer_console.output.recv().await.expect("answer text");
    offer_console.input.send(answer_text).unwrap();

    offer_console.input.send("ping over sctp".to_string()).unwrap();
    let received = answer_console.output.recv().await.expect("relayed message");
    assert_eq!(received, "ping over sctp");

    drop(offer_console.input);
    let offer_summary = offer_task.await.expect("offerer task").expect("offerer ok");
    assert_eq!(offer_summary.messages_sent, 1);

    let answer_summary = answer_task.await.expect("answerer task").expect("answerer ok");
    assert_eq!(answer_summary.messages_received, 1);

    lan.stop().await;
}
