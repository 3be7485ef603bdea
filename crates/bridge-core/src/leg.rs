//! Media leg: the bound sockets and payload bookkeeping for one side of the
//! bridge.
//!
//! Both shapes of the relay share this type: every SIP call owns one
//! [`MediaLeg`] and the gateway owns exactly one more for the RTSP source.
//! A leg holds up to four endpoints (RTP/RTCP for audio and video) plus the
//! negotiated payload type per slot. Once bound, an endpoint never changes
//! its socket identity; only the remote address is mutable, either from SDP
//! negotiation or learned from received traffic (symmetric RTP).

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::port::PortPool;
use crate::types::{MediaKind, PayloadInfo, StreamMode};

/// One bound, non-blocking UDP socket with its addressing state.
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    local: SocketAddr,
    remote: Option<SocketAddr>,
}

impl Endpoint {
    /// Bind on `ip:port`. Port 0 binds an ephemeral port; the effective
    /// local address is re-read from the OS either way.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Endpoint> {
        let addr = SocketAddr::new(ip, port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local = socket
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Endpoint { socket, local, remote: None })
    }

    /// The bound local address.
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// The current remote address: SDP-configured, or overwritten by
    /// symmetric-RTP learning.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Set the remote address explicitly.
    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote = Some(addr);
    }

    /// The underlying socket.
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

/// Copy of a leg's mutable negotiation state: per-slot payloads and remote
/// addresses. Taken before a renegotiation so a failed one can be rolled
/// back without disturbing the bound sockets.
#[derive(Debug, Clone)]
pub(crate) struct MediaState {
    payloads: [PayloadInfo; 4],
    remotes: [Option<SocketAddr>; 4],
}

/// Up to four endpoints plus per-slot payload state for one side of the
/// relay.
#[derive(Debug, Default)]
pub struct MediaLeg {
    endpoints: [Option<Endpoint>; 4],
    payloads: [PayloadInfo; 4],
}

impl MediaLeg {
    /// Empty, unprovisioned leg.
    pub fn new() -> MediaLeg {
        MediaLeg::default()
    }

    /// Bind the RTP/RTCP pair for `kind` on `ip` from the port pool.
    ///
    /// Existing endpoints for the kind are replaced (their sockets close on
    /// drop).
    pub async fn provision(
        &mut self,
        pool: &mut PortPool,
        ip: IpAddr,
        kind: MediaKind,
    ) -> Result<()> {
        let (rtp, rtcp) = pool.allocate_pair(ip).await?;
        trace!(%kind, rtp = %rtp.local(), rtcp = %rtcp.local(), "provisioned media pair");
        self.endpoints[kind.rtp().index()] = Some(rtp);
        self.endpoints[kind.rtcp().index()] = Some(rtcp);
        Ok(())
    }

    /// Close every endpoint and reset payload state.
    pub fn release_all(&mut self) {
        for slot in &mut self.endpoints {
            *slot = None;
        }
        self.clear_payloads();
    }

    /// Reset payload state ahead of a fresh negotiation.
    pub fn clear_payloads(&mut self) {
        for payload in &mut self.payloads {
            payload.clear();
        }
    }

    /// The endpoint for a stream mode, when provisioned.
    pub fn endpoint(&self, mode: StreamMode) -> Option<&Endpoint> {
        self.endpoints[mode.index()].as_ref()
    }

    /// Mutable endpoint access.
    pub fn endpoint_mut(&mut self, mode: StreamMode) -> Option<&mut Endpoint> {
        self.endpoints[mode.index()].as_mut()
    }

    /// True once the RTP endpoint for `kind` exists.
    pub fn is_provisioned(&self, kind: MediaKind) -> bool {
        self.endpoints[kind.rtp().index()].is_some()
    }

    /// Local RTP port for `kind`, when provisioned.
    pub fn local_rtp_port(&self, kind: MediaKind) -> Option<u16> {
        self.endpoint(kind.rtp()).map(|ep| ep.local().port())
    }

    /// Payload state for a stream mode.
    pub fn payload(&self, mode: StreamMode) -> &PayloadInfo {
        &self.payloads[mode.index()]
    }

    /// Record the negotiated payload for a stream mode.
    pub fn set_payload(&mut self, mode: StreamMode, mime: &str, format: u8) {
        let payload = &mut self.payloads[mode.index()];
        payload.mime = mime.to_string();
        payload.format = Some(format);
    }

    /// Set the remote RTP/RTCP addresses for `kind` as the standard adjacent
    /// pair: RTCP on `rtp_port + 1`.
    pub fn set_remote_pair(&mut self, kind: MediaKind, ip: IpAddr, rtp_port: u16) {
        if let Some(ep) = self.endpoint_mut(kind.rtp()) {
            ep.set_remote(SocketAddr::new(ip, rtp_port));
        }
        if let Some(ep) = self.endpoint_mut(kind.rtcp()) {
            ep.set_remote(SocketAddr::new(ip, rtp_port.saturating_add(1)));
        }
    }

    /// Snapshot the payloads and remote addresses for rollback.
    pub(crate) fn media_state(&self) -> MediaState {
        let mut remotes = [None; 4];
        for (slot, ep) in self.endpoints.iter().enumerate() {
            remotes[slot] = ep.as_ref().and_then(Endpoint::remote);
        }
        MediaState { payloads: self.payloads.clone(), remotes }
    }

    /// Restore a previously taken snapshot. Endpoints provisioned since the
    /// snapshot keep their sockets but revert to an unset remote.
    pub(crate) fn restore_media_state(&mut self, state: MediaState) {
        self.payloads = state.payloads;
        for (slot, ep) in self.endpoints.iter_mut().enumerate() {
            if let Some(ep) = ep.as_mut() {
                ep.remote = state.remotes[slot];
            }
        }
    }

    /// Non-blocking receive on one endpoint.
    ///
    /// Returns `None` when the endpoint is unprovisioned or has nothing to
    /// read. With `learn_remote` the packet's source address overwrites the
    /// endpoint's remote (symmetric RTP); otherwise the configured remote
    /// stays authoritative.
    pub fn try_recv(
        &mut self,
        mode: StreamMode,
        buf: &mut [u8],
        learn_remote: bool,
    ) -> Option<usize> {
        let ep = self.endpoints[mode.index()].as_mut()?;
        match ep.socket.try_recv_from(buf) {
            Ok((len, src)) => {
                if learn_remote {
                    ep.remote = Some(src);
                }
                Some(len)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                // Transient receive errors (e.g. ICMP port unreachable
                // surfacing on the socket) are absorbed; the relay must keep
                // servicing other streams.
                debug!(%mode, error = %e, "recv error on media socket");
                None
            }
        }
    }

    /// Send `buf` out of this leg's endpoint for `mode` to its remote.
    ///
    /// Silently does nothing when the endpoint or its remote is unknown;
    /// send failures are logged and dropped.
    pub fn forward(&self, mode: StreamMode, buf: &[u8]) {
        let Some(ep) = self.endpoint(mode) else { return };
        let Some(remote) = ep.remote else { return };
        if let Err(e) = ep.socket.try_send_to(buf, remote) {
            if e.kind() != ErrorKind::WouldBlock {
                debug!(%mode, %remote, error = %e, "send error on media socket");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn provision_binds_adjacent_rtp_rtcp_pair() {
        let config = BridgeConfig {
            rtp_start_port: 24000,
            rtp_end_port: 24100,
            ..Default::default()
        };
        let mut pool = PortPool::new(&config);
        let mut leg = MediaLeg::new();
        leg.provision(&mut pool, LOCALHOST, MediaKind::Audio).await.unwrap();

        let rtp = leg.endpoint(StreamMode::AudioRtp).unwrap().local().port();
        let rtcp = leg.endpoint(StreamMode::AudioRtcp).unwrap().local().port();
        assert_eq!(rtcp, rtp + 1);
        assert!(leg.is_provisioned(MediaKind::Audio));
        assert!(!leg.is_provisioned(MediaKind::Video));
    }

    #[tokio::test]
    async fn ephemeral_bind_reads_back_real_port() {
        let ep = Endpoint::bind(LOCALHOST, 0).await.unwrap();
        assert_ne!(ep.local().port(), 0);
    }

    #[tokio::test]
    async fn release_closes_and_resets() {
        let config = BridgeConfig {
            rtp_start_port: 24200,
            rtp_end_port: 24300,
            ..Default::default()
        };
        let mut pool = PortPool::new(&config);
        let mut leg = MediaLeg::new();
        leg.provision(&mut pool, LOCALHOST, MediaKind::Video).await.unwrap();
        leg.set_payload(StreamMode::VideoRtp, "H264", 96);

        leg.release_all();
        assert!(leg.endpoint(StreamMode::VideoRtp).is_none());
        assert!(!leg.payload(StreamMode::VideoRtp).is_set());
    }

    #[tokio::test]
    async fn media_state_snapshot_rolls_back_a_renegotiation() {
        let config = BridgeConfig {
            rtp_start_port: 24600,
            rtp_end_port: 24700,
            ..Default::default()
        };
        let mut pool = PortPool::new(&config);
        let mut leg = MediaLeg::new();
        leg.provision(&mut pool, LOCALHOST, MediaKind::Audio).await.unwrap();
        leg.set_payload(StreamMode::AudioRtp, "PCMA", 8);
        leg.set_remote_pair(MediaKind::Audio, LOCALHOST, 41000);
        let snapshot = leg.media_state();

        // A failed renegotiation may clear payloads, move remotes and
        // provision new kinds before the failure surfaces.
        leg.clear_payloads();
        leg.set_remote_pair(MediaKind::Audio, LOCALHOST, 42000);
        leg.provision(&mut pool, LOCALHOST, MediaKind::Video).await.unwrap();
        leg.set_remote_pair(MediaKind::Video, LOCALHOST, 43000);

        leg.restore_media_state(snapshot);
        assert_eq!(leg.payload(StreamMode::AudioRtp).format, Some(8));
        assert_eq!(
            leg.endpoint(StreamMode::AudioRtp).unwrap().remote().unwrap().port(),
            41000
        );
        // New sockets survive, but point nowhere until renegotiated.
        assert!(leg.endpoint(StreamMode::VideoRtp).is_some());
        assert!(leg.endpoint(StreamMode::VideoRtp).unwrap().remote().is_none());
    }

    #[tokio::test]
    async fn remote_pair_is_rtp_plus_one() {
        let config = BridgeConfig {
            rtp_start_port: 24400,
            rtp_end_port: 24500,
            ..Default::default()
        };
        let mut pool = PortPool::new(&config);
        let mut leg = MediaLeg::new();
        leg.provision(&mut pool, LOCALHOST, MediaKind::Audio).await.unwrap();
        leg.set_remote_pair(MediaKind::Audio, LOCALHOST, 40000);

        assert_eq!(
            leg.endpoint(StreamMode::AudioRtp).unwrap().remote().unwrap().port(),
            40000
        );
        assert_eq!(
            leg.endpoint(StreamMode::AudioRtcp).unwrap().remote().unwrap().port(),
            40001
        );
    }
}
