//! The gateway: call admission, upstream session lifecycle and the glue
//! between negotiation and the relay.
//!
//! One gateway bridges every SIP call to a single shared RTSP stream. The
//! RTSP-facing media leg is provisioned once at construction; each admitted
//! call gets its own SIP-facing leg from the port pool. The embedding signal
//! stack calls in with offer text and call identifiers, then drives
//! [`Gateway::poll_media`] and [`Gateway::keepalive`] from its main loop.
//!
//! The upstream session is opened lazily by the first call that needs it and
//! closed when the last call leaves. If provisioning the RTSP leg fails at
//! construction the gateway stays up in a degraded state: calls are still
//! answered, no media flows, and the failure is logged once.

use std::time::Duration;

use rtspgate_sdp_core::{RtspTransport, SdpSession};
use tracing::{error, info, warn};

use crate::call::CallTable;
use crate::config::{BridgeConfig, DEFAULT_SESSION_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::leg::{MediaLeg, MediaState};
use crate::negotiate::{negotiate, OfferSummary};
use crate::port::PortPool;
use crate::relay::Relay;
use crate::rtsp::{EndpointHint, RtspSource};
use crate::types::{CallId, DialogId, Direction, MediaKind};

/// Result of admitting and answering a new call.
#[derive(Debug)]
pub struct NewCallOutcome {
    /// The SDP answer to send back to the caller
    pub answer: SdpSession,
    /// A call evicted to make room; its SIP dialog must be terminated by the
    /// embedding stack
    pub evicted: Option<(CallId, DialogId)>,
}

/// Cached state of the open upstream RTSP session, reused when further calls
/// join the same stream.
#[derive(Debug)]
struct UpstreamSession {
    sdp: SdpSession,
    server_host: String,
    audio_transport: Option<RtspTransport>,
    video_transport: Option<RtspTransport>,
    timeout: Duration,
    owner: CallId,
}

/// Rollback point for a renegotiation of an already-established call: the
/// mutable media state of both legs plus the call's directions.
#[derive(Debug)]
struct MediaSnapshot {
    call: MediaState,
    audio_dir: Direction,
    video_dir: Direction,
    rtsp: MediaState,
}

/// The media gateway. Owns every socket, the call table and the RTSP
/// collaborator; driven from a single task.
pub struct Gateway<S: RtspSource> {
    config: BridgeConfig,
    pool: PortPool,
    calls: CallTable,
    rtsp_leg: MediaLeg,
    relay: Relay,
    source: S,
    upstream: Option<UpstreamSession>,
    degraded: bool,
}

impl<S: RtspSource> Gateway<S> {
    /// Build a gateway over a validated copy of `config`.
    ///
    /// The RTSP-facing audio and video pairs are bound here. Failure does
    /// not abort: the gateway comes up degraded and keeps answering calls.
    pub async fn new(config: BridgeConfig, source: S) -> Gateway<S> {
        let config = config.validate();
        let mut pool = PortPool::new(&config);
        let mut rtsp_leg = MediaLeg::new();
        let mut degraded = false;
        for kind in MediaKind::ALL {
            if let Err(e) = rtsp_leg.provision(&mut pool, config.rtsp_local_ip, kind).await {
                error!(%kind, error = %e, "rtsp media leg unavailable, relaying disabled");
                degraded = true;
            }
        }
        Gateway {
            calls: CallTable::new(config.max_calls),
            relay: Relay::new(config.symmetric_rtp),
            pool,
            rtsp_leg,
            source,
            upstream: None,
            degraded,
            config,
        }
    }

    /// Admit a call and produce its SDP answer.
    ///
    /// Idempotent per call id: a duplicate notification renegotiates in
    /// place without re-provisioning. When the table is full the lowest
    /// resident call id is evicted and returned in the outcome. A failed
    /// first admission is fully rolled back (sockets released, an upstream
    /// session it owned alone torn down); a failed renegotiation of an
    /// already-established call restores its previous media state instead,
    /// so the duplicate notification cannot kill a healthy call.
    pub async fn on_new_call(
        &mut self,
        call_id: CallId,
        dialog_id: DialogId,
        offer: &str,
    ) -> Result<NewCallOutcome> {
        let offer = SdpSession::parse(offer)?;
        let summary = OfferSummary::extract(&offer)?;

        let admission = self.calls.admit(call_id, dialog_id);
        if let Some((evicted_id, _)) = admission.evicted {
            if let Some(upstream) = self.upstream.as_mut() {
                if upstream.owner == evicted_id {
                    upstream.owner = call_id;
                }
            }
        }
        let snapshot = if admission.existing { self.snapshot(call_id) } else { None };

        match self.answer_call(call_id, &summary).await {
            Ok(answer) => {
                self.log_media_summary();
                Ok(NewCallOutcome { answer, evicted: admission.evicted })
            }
            Err(e) => {
                match snapshot {
                    Some(snap) => self.restore(call_id, snap),
                    None => self.drop_call(call_id).await,
                }
                Err(e)
            }
        }
    }

    /// Renegotiate an existing call from a fresh offer (re-INVITE).
    ///
    /// The sockets of the call keep their identity; only payload state,
    /// remote addresses and directions change. Unknown calls fail with
    /// [`Error::CallNotFound`].
    ///
    /// A failed renegotiation restores the call's previous media state, so
    /// the embedder can reject the re-INVITE while the call keeps running
    /// under its old parameters. The exception is a sole owner whose
    /// upstream session had to be rebuilt: once the old session is gone
    /// there is no state worth restoring, and the call is torn down.
    pub async fn on_reinvite(&mut self, call_id: CallId, offer: &str) -> Result<SdpSession> {
        if self.calls.lookup(call_id).is_none() {
            return Err(Error::CallNotFound { call_id: call_id.0 });
        }
        let offer = SdpSession::parse(offer)?;
        let summary = OfferSummary::extract(&offer)?;

        // A sole owner renegotiating may change which kinds are set up, so
        // its upstream session is rebuilt from scratch.
        let rebuild = self
            .upstream
            .as_ref()
            .is_some_and(|u| u.owner == call_id && self.calls.count() == 1);
        let snapshot = if rebuild { None } else { self.snapshot(call_id) };
        if rebuild {
            self.close_upstream().await;
        }

        match self.answer_call(call_id, &summary).await {
            Ok(answer) => {
                self.log_media_summary();
                Ok(answer)
            }
            Err(e) => {
                match snapshot {
                    Some(snap) => self.restore(call_id, snap),
                    None => self.drop_call(call_id).await,
                }
                Err(e)
            }
        }
    }

    /// Release a terminated call. The last call out also closes the
    /// upstream session. Unknown ids are ignored.
    pub async fn on_call_terminated(&mut self, call_id: CallId) {
        self.drop_call(call_id).await;
        self.log_media_summary();
    }

    /// One relay pass; see [`Relay::poll_once`]. Call this continuously from
    /// the main loop.
    pub async fn poll_media(&mut self) {
        self.relay.poll_once(&mut self.calls, &mut self.rtsp_leg).await;
    }

    /// Refresh the upstream session. A no-op without one.
    pub async fn keepalive(&mut self) -> Result<()> {
        if self.upstream.is_some() {
            self.source.keepalive().await?;
        }
        Ok(())
    }

    /// How often [`Gateway::keepalive`] should run: half the negotiated
    /// session timeout, never below one second.
    pub fn keepalive_interval(&self) -> Duration {
        let timeout = self
            .upstream
            .as_ref()
            .map(|u| u.timeout)
            .unwrap_or(Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS));
        (timeout / 2).max(Duration::from_secs(1))
    }

    /// Number of resident calls.
    pub fn call_count(&self) -> usize {
        self.calls.count()
    }

    /// True when the RTSP media leg failed to provision and no media can
    /// flow.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The validated configuration in effect.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The RTSP collaborator.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Provision, open the upstream if needed, and negotiate the answer for
    /// a resident call.
    async fn answer_call(&mut self, call_id: CallId, summary: &OfferSummary) -> Result<SdpSession> {
        for kind in MediaKind::ALL {
            if summary.media(kind).is_none() {
                continue;
            }
            let call = self
                .calls
                .lookup_mut(call_id)
                .ok_or(Error::CallNotFound { call_id: call_id.0 })?;
            if !call.leg.is_provisioned(kind) {
                call.leg
                    .provision(&mut self.pool, self.config.sip_local_ip, kind)
                    .await?;
            }
        }

        if self.upstream.is_none() {
            let audio_hint = self.hint(summary, MediaKind::Audio);
            let video_hint = self.hint(summary, MediaKind::Video);
            let response = self.source.open(call_id, video_hint, audio_hint).await?;
            let sdp = SdpSession::parse(&response.sdp_body)?;
            self.source.play().await?;
            info!(
                owner = %call_id,
                timeout_secs = response.session_timeout.as_secs(),
                "upstream rtsp session playing"
            );
            self.upstream = Some(UpstreamSession {
                sdp,
                server_host: response.server_host,
                audio_transport: response.audio_transport,
                video_transport: response.video_transport,
                timeout: response.session_timeout,
                owner: call_id,
            });
        }

        let upstream = self.upstream.as_ref().expect("upstream session was just opened");
        let call = self
            .calls
            .lookup_mut(call_id)
            .ok_or(Error::CallNotFound { call_id: call_id.0 })?;
        negotiate(
            call,
            &mut self.rtsp_leg,
            summary,
            &upstream.sdp,
            upstream.audio_transport.as_ref(),
            upstream.video_transport.as_ref(),
            self.config.sip_local_ip,
            &upstream.server_host,
        )
    }

    /// SETUP hint for one media kind: our RTSP-facing RTP port, or `None`
    /// when the kind should not be set up.
    fn hint(&self, summary: &OfferSummary, kind: MediaKind) -> Option<EndpointHint> {
        if summary.upstream_direction(kind).suppresses_receive() {
            return None;
        }
        let rtp_port = self.rtsp_leg.local_rtp_port(kind)?;
        Some(EndpointHint {
            host: self.config.rtsp_local_ip.to_string(),
            rtp_port,
        })
    }

    /// Rollback point before renegotiating an established call.
    fn snapshot(&self, call_id: CallId) -> Option<MediaSnapshot> {
        let call = self.calls.lookup(call_id)?;
        Some(MediaSnapshot {
            call: call.leg.media_state(),
            audio_dir: call.audio_dir,
            video_dir: call.video_dir,
            rtsp: self.rtsp_leg.media_state(),
        })
    }

    /// Put both legs and the call's directions back the way they were.
    fn restore(&mut self, call_id: CallId, snapshot: MediaSnapshot) {
        self.rtsp_leg.restore_media_state(snapshot.rtsp);
        if let Some(call) = self.calls.lookup_mut(call_id) {
            call.leg.restore_media_state(snapshot.call);
            call.audio_dir = snapshot.audio_dir;
            call.video_dir = snapshot.video_dir;
        }
        warn!(%call_id, "renegotiation failed, previous media state restored");
    }

    /// Remove a call, closing its sockets. The upstream session follows its
    /// owner: it passes to a surviving call, or closes with the last one.
    async fn drop_call(&mut self, call_id: CallId) {
        if self.calls.release(call_id).is_none() {
            return;
        }
        let owned_here = self
            .upstream
            .as_ref()
            .is_some_and(|u| u.owner == call_id);
        if owned_here {
            let survivor = self.calls.iter().next().map(|c| c.call_id);
            match survivor {
                Some(id) => {
                    if let Some(upstream) = self.upstream.as_mut() {
                        upstream.owner = id;
                    }
                }
                None => self.close_upstream().await,
            }
        }
    }

    /// Tear the upstream session down, best effort.
    async fn close_upstream(&mut self) {
        if self.upstream.take().is_none() {
            return;
        }
        self.rtsp_leg.clear_payloads();
        if let Err(e) = self.source.stop().await {
            warn!(error = %e, "rtsp teardown failed");
        } else {
            info!("upstream rtsp session closed");
        }
    }

    /// Log a one-line relay summary per resident call.
    fn log_media_summary(&self) {
        info!(
            calls = self.calls.count(),
            capacity = self.calls.capacity(),
            upstream = self.upstream.is_some(),
            "relay state"
        );
        for call in self.calls.iter() {
            for kind in MediaKind::ALL {
                if let Some(port) = call.leg.local_rtp_port(kind) {
                    info!(
                        call = %call.call_id,
                        %kind,
                        port,
                        payload = ?call.leg.payload(kind.rtp()).format,
                        direction = ?call.direction(kind.rtp()),
                        "call media"
                    );
                }
            }
        }
    }
}
