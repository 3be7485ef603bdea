//! SDP offer/answer negotiation between the SIP leg and the RTSP source.
//!
//! The answer sent back to the SIP caller is the RTSP DESCRIBE body rewritten
//! in place on a clone: origin and connection addresses become the bridge's
//! SIP-facing address, each m= port becomes the call's SIP-side relay port,
//! and payload format numbers are renumbered to what the caller offered for
//! the same codec. The SETUP response's Transport header is authoritative for
//! where upstream RTP originates, even when the DESCRIBE body's c= line says
//! otherwise.

use std::net::IpAddr;

use rtspgate_sdp_core::{RtspTransport, SdpSession};
use tracing::{debug, info};

use crate::call::SipCall;
use crate::error::{Error, Result};
use crate::leg::MediaLeg;
use crate::types::{Direction, MediaKind};

/// One media section of the caller's offer, reduced to what negotiation
/// needs.
#[derive(Debug, Clone)]
pub struct OfferedMedia {
    /// Effective connection address for this section
    pub host: String,
    /// Offered RTP port
    pub port: u16,
    /// Offered direction, `SendRecv` when no flag is present
    pub direction: Direction,
    /// Payload numbers with their codec names, in offer order. The name is
    /// `None` for a format with neither an rtpmap nor a static default.
    pub formats: Vec<(u8, Option<String>)>,
}

/// The caller's offer, one entry per media kind. Only the first section of
/// each kind is considered.
#[derive(Debug, Clone, Default)]
pub struct OfferSummary {
    audio: Option<OfferedMedia>,
    video: Option<OfferedMedia>,
}

impl OfferSummary {
    /// Reduce an offer to its negotiable facts.
    ///
    /// Fails when the offer carries no audio or video at all, when a section
    /// lacks any usable connection address, or when a format number does not
    /// parse.
    pub fn extract(offer: &SdpSession) -> Result<OfferSummary> {
        let mut summary = OfferSummary::default();
        for kind in MediaKind::ALL {
            let Some(media) = offer.media_of_kind(kind.sdp_name()) else {
                continue;
            };
            let host = offer
                .effective_connection_address(media)
                .ok_or_else(|| {
                    Error::negotiation(format!("offered {} has no connection address", kind))
                })?
                .to_string();
            let mut formats = Vec::with_capacity(media.formats.len());
            for fmt in &media.formats {
                let pt: u8 = fmt.parse().map_err(|_| {
                    Error::negotiation(format!("unparsable payload format {:?}", fmt))
                })?;
                formats.push((pt, codec_name(media.rtpmap_for(pt), pt)));
            }
            let direction = media
                .direction_attr()
                .map(Direction::from_attr)
                .unwrap_or_default();
            let offered = OfferedMedia { host, port: media.port, direction, formats };
            match kind {
                MediaKind::Audio => summary.audio = Some(offered),
                MediaKind::Video => summary.video = Some(offered),
            }
        }
        if summary.audio.is_none() && summary.video.is_none() {
            return Err(Error::negotiation("offer carries no audio or video media"));
        }
        Ok(summary)
    }

    /// The offered section for a media kind, when present.
    pub fn media(&self, kind: MediaKind) -> Option<&OfferedMedia> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    /// Whether the upstream stream for a kind should flow at all.
    ///
    /// `Inactive` when the kind was not offered, when the offer holds the
    /// null address, or when the caller will not receive it (sendonly or
    /// inactive). The gateway skips SETUP for inactive kinds.
    pub fn upstream_direction(&self, kind: MediaKind) -> Direction {
        match self.media(kind) {
            None => Direction::Inactive,
            Some(m) if m.host == "0.0.0.0" => Direction::Inactive,
            Some(m) if m.direction.suppresses_receive() => Direction::Inactive,
            Some(_) => Direction::SendRecv,
        }
    }
}

/// Run a full negotiation for one call and produce the SIP answer.
///
/// Payload state of both legs is rebuilt from scratch, the call's remote
/// media addresses and directions are taken from the offer, and the RTSP
/// leg's remotes are taken from the SETUP transports (falling back to
/// `rtsp_fallback_host`, the host of the RTSP URL, when a transport names no
/// source). All document rewriting happens on a clone of `rtsp_sdp`; on
/// error no partial answer escapes.
pub fn negotiate(
    call: &mut SipCall,
    rtsp_leg: &mut MediaLeg,
    summary: &OfferSummary,
    rtsp_sdp: &SdpSession,
    audio_transport: Option<&RtspTransport>,
    video_transport: Option<&RtspTransport>,
    sip_local_ip: IpAddr,
    rtsp_fallback_host: &str,
) -> Result<SdpSession> {
    call.leg.clear_payloads();
    rtsp_leg.clear_payloads();

    // Upstream payload numbering comes from the DESCRIBE body, first format
    // of each section.
    for kind in MediaKind::ALL {
        if let Some(media) = rtsp_sdp.media_of_kind(kind.sdp_name()) {
            let pt = media.first_format().ok_or_else(|| {
                Error::negotiation(format!("rtsp {} media has no payload format", kind))
            })?;
            if let Some(name) = codec_name(media.rtpmap_for(pt), pt) {
                rtsp_leg.set_payload(kind.rtp(), &name, pt);
            } else {
                debug!(%kind, pt, "rtsp media has no rtpmap, payload left unmatched");
            }
        }
    }

    // Caller side: remote addresses, directions and the payload number the
    // caller uses for the upstream codec.
    for kind in MediaKind::ALL {
        let Some(offered) = summary.media(kind) else { continue };
        let ip: IpAddr = offered.host.parse().map_err(|_| {
            Error::negotiation(format!("unresolvable {} address {:?}", kind, offered.host))
        })?;
        call.leg.set_remote_pair(kind, ip, offered.port);
        call.set_direction(kind, offered.direction);

        let upstream_mime = rtsp_leg.payload(kind.rtp()).mime.clone();
        if upstream_mime.is_empty() {
            continue;
        }
        match offered
            .formats
            .iter()
            .find(|(_, name)| {
                name.as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(&upstream_mime))
            }) {
            Some(&(pt, _)) => call.leg.set_payload(kind.rtp(), &upstream_mime, pt),
            None => {
                debug!(%kind, codec = %upstream_mime, "offer has no matching codec, relaying without rewrite");
            }
        }
    }

    // The answer: the DESCRIBE body pointed back at this bridge.
    let sip_ip = sip_local_ip.to_string();
    let mut answer = rtsp_sdp.clone();
    answer.set_origin_address(&sip_ip);
    answer.set_connection_address(&sip_ip);

    for kind in MediaKind::ALL {
        if summary.media(kind).is_none() {
            if answer.remove_media(kind.sdp_name()) > 0 {
                info!(%kind, "dropping media the caller did not offer");
            }
            continue;
        }
        let Some(media) = answer.media_of_kind_mut(kind.sdp_name()) else {
            continue;
        };
        let local_port = call.leg.local_rtp_port(kind).ok_or_else(|| {
            Error::negotiation(format!("{} leg is not provisioned", kind))
        })?;
        media.port = local_port;
        if media.connection.is_some() {
            media.set_connection_address(&sip_ip);
        }
        if let (Some(old), Some(new)) = (
            rtsp_leg.payload(kind.rtp()).format,
            call.leg.payload(kind.rtp()).format,
        ) {
            if old != new {
                media.renumber_format(old, new);
            }
        }

        let transport = match kind {
            MediaKind::Audio => audio_transport,
            MediaKind::Video => video_transport,
        };
        match transport {
            Some(t) => {
                let source = t.source.as_deref().unwrap_or(rtsp_fallback_host);
                let source_ip: IpAddr = source.parse().map_err(|_| {
                    Error::negotiation(format!("unresolvable {} source {:?}", kind, source))
                })?;
                match t.server_port {
                    Some(port) => rtsp_leg.set_remote_pair(kind, source_ip, port),
                    // No server_port: wait for symmetric learning instead of
                    // aiming at a guessed port.
                    None => debug!(%kind, "transport has no server_port, remote stays unset"),
                }
            }
            None => debug!(%kind, "no transport negotiated, remote stays unset"),
        }
    }

    if answer.media.is_empty() {
        return Err(Error::negotiation("no media in common with the rtsp source"));
    }
    if answer.reorder_audio_first() {
        debug!("reordered answer to put audio first");
    }
    Ok(answer)
}

/// Codec name for a payload: the rtpmap encoding name when present, else the
/// RTP/AVP static default for the well-known PCM numbers.
fn codec_name(rtpmap: Option<&str>, pt: u8) -> Option<String> {
    if let Some(value) = rtpmap {
        let name = value.split('/').next().unwrap_or(value).trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    match pt {
        0 => Some("PCMU".to_string()),
        8 => Some("PCMA".to_string()),
        _ => None,
    }
}
