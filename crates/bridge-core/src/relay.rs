//! The packet relay loop.
//!
//! One pass waits (bounded, ~10 ms) for readiness across every provisioned
//! socket, then drains each one and forwards the datagrams to the paired
//! leg: a call's SIP-side sockets feed the shared RTSP leg, and the RTSP
//! leg fans out to every resident call of the matching mode. RTP payload
//! types are rewritten on the fly when the two legs negotiated different
//! numbers for the same codec.
//!
//! A datagram that fails RTP validation (too short, wrong version, payload
//! type not matching the sender leg) is forwarded unmodified rather than
//! dropped. That pass-through-on-mismatch behavior is inherited and kept
//! deliberately; see DESIGN.md.
//!
//! The caller drives `poll_once` from a single task; admission, negotiation
//! and relay servicing all mutate the call table from that task, so the
//! bridge needs no locks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::select_all;
use tokio::time::timeout;

use crate::call::CallTable;
use crate::leg::MediaLeg;
use crate::rtp;
use crate::types::{PayloadInfo, StreamMode};

/// Bound on one readiness wait. Housekeeping interleaved by the caller is
/// never starved longer than this.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Receive buffer size; comfortably above any sane RTP MTU.
const RECV_BUF_LEN: usize = 2048;

/// Relay state: the scratch buffer and the symmetric-RTP switch.
pub struct Relay {
    symmetric_rtp: bool,
    poll_timeout: Duration,
    buf: Box<[u8; RECV_BUF_LEN]>,
}

impl Relay {
    /// New relay. With `symmetric_rtp` the remote address of every endpoint
    /// is overwritten by the source of each received datagram.
    pub fn new(symmetric_rtp: bool) -> Relay {
        Relay {
            symmetric_rtp,
            poll_timeout: POLL_TIMEOUT,
            buf: Box::new([0u8; RECV_BUF_LEN]),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_poll_timeout(mut self, poll_timeout: Duration) -> Relay {
        self.poll_timeout = poll_timeout;
        self
    }

    /// One relay pass: bounded readiness wait, then service every socket.
    ///
    /// A timeout with nothing ready is the normal idle case, not an error.
    /// Per-packet failures are logged inside the leg and absorbed; this
    /// never returns an error and never blocks beyond the poll timeout.
    pub async fn poll_once(&mut self, calls: &mut CallTable, rtsp_leg: &mut MediaLeg) {
        self.wait_ready(calls, rtsp_leg).await;
        self.service_sip_side(calls, rtsp_leg);
        self.service_rtsp_side(calls, rtsp_leg);
    }

    /// Wait until any provisioned socket is readable, or the poll timeout
    /// elapses. With no sockets at all, just sleep out the timeout so an
    /// idle gateway does not spin.
    async fn wait_ready(&self, calls: &CallTable, rtsp_leg: &MediaLeg) {
        let mut readables: Vec<Pin<Box<dyn Future<Output = std::io::Result<()>> + '_>>> =
            Vec::new();
        for mode in StreamMode::ALL {
            if let Some(ep) = rtsp_leg.endpoint(mode) {
                readables.push(Box::pin(ep.socket().readable()));
            }
        }
        for call in calls.iter() {
            for mode in StreamMode::ALL {
                if let Some(ep) = call.leg.endpoint(mode) {
                    readables.push(Box::pin(ep.socket().readable()));
                }
            }
        }
        if readables.is_empty() {
            tokio::time::sleep(self.poll_timeout).await;
            return;
        }
        let _ = timeout(self.poll_timeout, select_all(readables)).await;
    }

    /// Drain every call's SIP-side sockets into the shared RTSP leg.
    fn service_sip_side(&mut self, calls: &mut CallTable, rtsp_leg: &mut MediaLeg) {
        for call in calls.iter_mut() {
            for mode in StreamMode::ALL {
                while let Some(len) =
                    call.leg.try_recv(mode, &mut self.buf[..], self.symmetric_rtp)
                {
                    let packet = &mut self.buf[..len];
                    if !mode.is_rtcp() {
                        translate_payload(packet, call.leg.payload(mode), rtsp_leg.payload(mode));
                    }
                    rtsp_leg.forward(mode, packet);
                }
            }
        }
    }

    /// Drain the RTSP leg and fan each datagram out to every resident call,
    /// honoring each call's negotiated direction: a call whose direction for
    /// the media kind is Inactive or SendOnly does not want to receive, so
    /// the forward is suppressed for that call only.
    fn service_rtsp_side(&mut self, calls: &mut CallTable, rtsp_leg: &mut MediaLeg) {
        for mode in StreamMode::ALL {
            while let Some(len) =
                rtsp_leg.try_recv(mode, &mut self.buf[..], self.symmetric_rtp)
            {
                // Each call may have negotiated its own payload number, so
                // the header is re-derived from the original bytes per call.
                let original_pt_octet = if len >= 2 { Some(self.buf[1]) } else { None };
                for call in calls.iter() {
                    if call.direction(mode).suppresses_receive() {
                        continue;
                    }
                    if let Some(octet) = original_pt_octet {
                        self.buf[1] = octet;
                    }
                    let packet = &mut self.buf[..len];
                    if !mode.is_rtcp() {
                        translate_payload(packet, rtsp_leg.payload(mode), call.leg.payload(mode));
                    }
                    call.leg.forward(mode, packet);
                }
            }
        }
    }
}

/// Rewrite the RTP payload-type field from the sender leg's numbering to the
/// receiver leg's, when both are known and differ.
///
/// Returns false when the datagram fails validation (short, wrong version,
/// or payload type not matching what the sender leg negotiated); the packet
/// is left untouched and the caller forwards it as-is.
fn translate_payload(packet: &mut [u8], from: &PayloadInfo, to: &PayloadInfo) -> bool {
    if packet.len() < rtp::MIN_HEADER_LEN {
        return false;
    }
    if rtp::version(packet) != 2 {
        return false;
    }
    let Some(from_pt) = from.format else {
        return false;
    };
    if rtp::payload_type(packet) != from_pt {
        return false;
    }
    if let Some(to_pt) = to.format {
        if to_pt != from_pt {
            rtp::set_payload_type(packet, to_pt);
        }
    }
    true
}
