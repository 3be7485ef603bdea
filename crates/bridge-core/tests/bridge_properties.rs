//! End-to-end relay behavior over real UDP sockets: a scripted RTSP
//! collaborator stands in for the camera's control plane while plain sockets
//! play the camera's and the caller's media endpoints.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use rtspgate_bridge_core::{
    BridgeConfig, CallId, DialogId, EndpointHint, Error, Gateway, Result, RtspOpenResponse,
    RtspSource,
};
use rtspgate_sdp_core::RtspTransport;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const RTSP_BODY: &str = "v=0\r\n\
    o=- 555 1 IN IP4 192.168.1.64\r\n\
    s=camera\r\n\
    c=IN IP4 192.168.1.64\r\n\
    t=0 0\r\n\
    m=audio 0 RTP/AVP 97\r\n\
    a=rtpmap:97 PCMA/8000\r\n";

/// Camera control plane: answers with a fixed audio-only session whose RTP
/// originates from `camera_port`.
struct CameraSource {
    camera_port: u16,
    last_audio_hint: Option<EndpointHint>,
}

impl CameraSource {
    fn new(camera_port: u16) -> CameraSource {
        CameraSource { camera_port, last_audio_hint: None }
    }
}

#[async_trait]
impl RtspSource for CameraSource {
    async fn open(
        &mut self,
        _call_id: CallId,
        _video_hint: Option<EndpointHint>,
        audio_hint: Option<EndpointHint>,
    ) -> Result<RtspOpenResponse> {
        self.last_audio_hint = audio_hint;
        let header = format!(
            "RTP/AVP;unicast;server_port={}-{};source=127.0.0.1",
            self.camera_port,
            self.camera_port + 1
        );
        Ok(RtspOpenResponse {
            sdp_body: RTSP_BODY.to_string(),
            server_host: "127.0.0.1".to_string(),
            video_transport: None,
            audio_transport: Some(RtspTransport::parse(&header).map_err(Error::from)?),
            session_timeout: Duration::from_secs(60),
        })
    }

    async fn play(&mut self) -> Result<()> {
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<()> {
        Ok(())
    }
}

fn config(start: u16, end: u16) -> BridgeConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    BridgeConfig {
        rtp_start_port: start,
        rtp_end_port: end,
        sip_local_ip: LOCALHOST,
        rtsp_local_ip: LOCALHOST,
        ..Default::default()
    }
}

fn pcma_offer(caller_port: u16, extra: &str) -> String {
    format!(
        "v=0\r\n\
         o=alice 1 1 IN IP4 127.0.0.1\r\n\
         s=call\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m=audio {} RTP/AVP 8\r\n\
         a=rtpmap:8 PCMA/8000\r\n{}",
        caller_port, extra
    )
}

fn rtp_packet(pt: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; 12];
    packet[0] = 0x80;
    packet[1] = pt;
    packet.extend_from_slice(payload);
    packet
}

async fn pump<S: RtspSource>(gw: &mut Gateway<S>, passes: usize) {
    for _ in 0..passes {
        gw.poll_media().await;
    }
}

async fn recv_with_deadline(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (len, src) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no datagram arrived in time")
        .expect("recv failed");
    (buf[..len].to_vec(), src)
}

async fn assert_silent(socket: &UdpSocket) {
    let mut buf = [0u8; 2048];
    let outcome = timeout(Duration::from_millis(100), socket.recv_from(&mut buf)).await;
    assert!(outcome.is_err(), "unexpected datagram");
}

#[tokio::test]
async fn camera_audio_reaches_the_caller_with_rewritten_payload_type() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let caller = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(28000, 28100), source).await;

    let offer = pcma_offer(caller.local_addr().unwrap().port(), "");
    gw.on_new_call(CallId(1), DialogId(10), &offer).await.unwrap();

    let bridge_port = gw.source().last_audio_hint.as_ref().unwrap().rtp_port;
    camera
        .send_to(&rtp_packet(97, b"voice"), (LOCALHOST, bridge_port))
        .await
        .unwrap();
    pump(&mut gw, 2).await;

    let (packet, _) = recv_with_deadline(&caller).await;
    // Camera's 97 becomes the caller's negotiated 8; payload bytes survive.
    assert_eq!(packet[1] & 0x7f, 8);
    assert_eq!(&packet[12..], b"voice");
}

#[tokio::test]
async fn caller_audio_reaches_the_camera_with_rewritten_payload_type() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let caller = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(28100, 28200), source).await;

    let offer = pcma_offer(caller.local_addr().unwrap().port(), "");
    let outcome = gw.on_new_call(CallId(1), DialogId(10), &offer).await.unwrap();
    let answer_port = outcome.answer.media_of_kind("audio").unwrap().port;

    caller
        .send_to(&rtp_packet(8, b"hello"), (LOCALHOST, answer_port))
        .await
        .unwrap();
    pump(&mut gw, 2).await;

    let (packet, _) = recv_with_deadline(&camera).await;
    assert_eq!(packet[1] & 0x7f, 97);
    assert_eq!(&packet[12..], b"hello");
}

#[tokio::test]
async fn short_datagrams_pass_through_byte_for_byte() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let caller = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(28200, 28300), source).await;

    let offer = pcma_offer(caller.local_addr().unwrap().port(), "");
    let outcome = gw.on_new_call(CallId(1), DialogId(10), &offer).await.unwrap();
    let answer_port = outcome.answer.media_of_kind("audio").unwrap().port;

    // Too short to be RTP, still relayed unmodified.
    let stub = [1u8, 2, 3, 4, 5, 6, 7, 8];
    caller.send_to(&stub, (LOCALHOST, answer_port)).await.unwrap();
    pump(&mut gw, 2).await;

    let (packet, _) = recv_with_deadline(&camera).await;
    assert_eq!(packet, stub);
}

#[tokio::test]
async fn camera_fanout_skips_calls_that_do_not_receive() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let listener = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let muted = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(28300, 28400), source).await;

    let listening_offer = pcma_offer(listener.local_addr().unwrap().port(), "");
    gw.on_new_call(CallId(1), DialogId(10), &listening_offer).await.unwrap();
    let muted_offer = pcma_offer(muted.local_addr().unwrap().port(), "a=sendonly\r\n");
    gw.on_new_call(CallId(2), DialogId(20), &muted_offer).await.unwrap();

    let bridge_port = gw.source().last_audio_hint.as_ref().unwrap().rtp_port;
    camera
        .send_to(&rtp_packet(97, b"fanout"), (LOCALHOST, bridge_port))
        .await
        .unwrap();
    pump(&mut gw, 2).await;

    let (packet, _) = recv_with_deadline(&listener).await;
    assert_eq!(&packet[12..], b"fanout");
    assert_silent(&muted).await;
}

#[tokio::test]
async fn symmetric_rtp_learns_the_real_camera_address() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let nat_camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let caller = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    // The transport names `camera`, but packets actually come from
    // `nat_camera`.
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(28400, 28500), source).await;

    let offer = pcma_offer(caller.local_addr().unwrap().port(), "");
    let outcome = gw.on_new_call(CallId(1), DialogId(10), &offer).await.unwrap();
    let answer_port = outcome.answer.media_of_kind("audio").unwrap().port;
    let bridge_port = gw.source().last_audio_hint.as_ref().unwrap().rtp_port;

    nat_camera
        .send_to(&rtp_packet(97, b"learn"), (LOCALHOST, bridge_port))
        .await
        .unwrap();
    pump(&mut gw, 2).await;
    recv_with_deadline(&caller).await;

    // Return traffic now follows the learned source.
    caller
        .send_to(&rtp_packet(8, b"reply"), (LOCALHOST, answer_port))
        .await
        .unwrap();
    pump(&mut gw, 2).await;

    let (packet, _) = recv_with_deadline(&nat_camera).await;
    assert_eq!(&packet[12..], b"reply");
    assert_silent(&camera).await;
}

#[tokio::test]
async fn failed_reinvite_leaves_the_relay_unaffected() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let first = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let second = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(29000, 29100), source).await;

    gw.on_new_call(
        CallId(1),
        DialogId(10),
        &pcma_offer(first.local_addr().unwrap().port(), ""),
    )
    .await
    .unwrap();
    gw.on_new_call(
        CallId(2),
        DialogId(20),
        &pcma_offer(second.local_addr().unwrap().port(), ""),
    )
    .await
    .unwrap();

    // A renegotiation that dies mid-way must not disturb the running call.
    let bad = pcma_offer(first.local_addr().unwrap().port(), "")
        .replace("c=IN IP4 127.0.0.1", "c=IN IP4 nowhere.invalid");
    gw.on_reinvite(CallId(1), &bad).await.unwrap_err();

    let bridge_port = gw.source().last_audio_hint.as_ref().unwrap().rtp_port;
    camera
        .send_to(&rtp_packet(97, b"still-here"), (LOCALHOST, bridge_port))
        .await
        .unwrap();
    pump(&mut gw, 2).await;

    let (packet, _) = recv_with_deadline(&first).await;
    assert_eq!(packet[1] & 0x7f, 8);
    assert_eq!(&packet[12..], b"still-here");
    let (packet, _) = recv_with_deadline(&second).await;
    assert_eq!(packet[1] & 0x7f, 8);
}

#[tokio::test]
async fn answer_advertises_an_even_relay_port_in_range() {
    let camera = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let caller = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let source = CameraSource::new(camera.local_addr().unwrap().port());
    let mut gw = Gateway::new(config(28500, 28600), source).await;

    let offer = pcma_offer(caller.local_addr().unwrap().port(), "");
    let outcome = gw.on_new_call(CallId(1), DialogId(10), &offer).await.unwrap();
    let port = outcome.answer.media_of_kind("audio").unwrap().port;
    assert_eq!(port % 2, 0);
    assert!((28500..28600).contains(&port));
}
