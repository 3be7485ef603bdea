//! Core identifier and stream classification types for the media bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SIP call identifier, unique while the call is resident in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallId(pub i32);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SIP dialog identifier associated with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(pub i32);

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media type carried by a stream pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Audio media
    Audio,
    /// Video media
    Video,
}

impl MediaKind {
    /// Both media kinds, audio first.
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    /// The SDP m= line media token for this kind.
    pub fn sdp_name(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// The RTP stream mode of this kind.
    pub fn rtp(self) -> StreamMode {
        match self {
            MediaKind::Audio => StreamMode::AudioRtp,
            MediaKind::Video => StreamMode::VideoRtp,
        }
    }

    /// The RTCP stream mode of this kind.
    pub fn rtcp(self) -> StreamMode {
        match self {
            MediaKind::Audio => StreamMode::AudioRtcp,
            MediaKind::Video => StreamMode::VideoRtcp,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sdp_name())
    }
}

/// One of the four sockets a leg can own: RTP and RTCP for audio and video.
///
/// RTP and RTCP of a kind are always allocated as an adjacent port pair,
/// RTCP on RTP port + 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamMode {
    /// Audio RTP
    AudioRtp,
    /// Audio RTCP
    AudioRtcp,
    /// Video RTP
    VideoRtp,
    /// Video RTCP
    VideoRtcp,
}

impl StreamMode {
    /// All stream modes in slot order.
    pub const ALL: [StreamMode; 4] = [
        StreamMode::AudioRtp,
        StreamMode::AudioRtcp,
        StreamMode::VideoRtp,
        StreamMode::VideoRtcp,
    ];

    /// Slot index of this mode inside a leg.
    pub fn index(self) -> usize {
        match self {
            StreamMode::AudioRtp => 0,
            StreamMode::AudioRtcp => 1,
            StreamMode::VideoRtp => 2,
            StreamMode::VideoRtcp => 3,
        }
    }

    /// The media kind this mode belongs to.
    pub fn kind(self) -> MediaKind {
        match self {
            StreamMode::AudioRtp | StreamMode::AudioRtcp => MediaKind::Audio,
            StreamMode::VideoRtp | StreamMode::VideoRtcp => MediaKind::Video,
        }
    }

    /// True for the RTCP modes.
    pub fn is_rtcp(self) -> bool {
        matches!(self, StreamMode::AudioRtcp | StreamMode::VideoRtcp)
    }

    /// The RTP mode of this mode's media kind. Payload bookkeeping is kept
    /// on the RTP slot only.
    pub fn rtp_slot(self) -> StreamMode {
        self.kind().rtp()
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamMode::AudioRtp => "audio-rtp",
            StreamMode::AudioRtcp => "audio-rtcp",
            StreamMode::VideoRtp => "video-rtp",
            StreamMode::VideoRtcp => "video-rtcp",
        };
        f.write_str(name)
    }
}

/// Stream direction negotiated in SDP, from the receiver's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// a=sendrecv or no direction attribute
    #[default]
    SendRecv,
    /// a=recvonly
    RecvOnly,
    /// a=sendonly
    SendOnly,
    /// a=inactive
    Inactive,
}

impl Direction {
    /// Map an SDP direction flag attribute; anything unknown means no
    /// restriction.
    pub fn from_attr(attr: &str) -> Direction {
        if attr.eq_ignore_ascii_case("sendonly") {
            Direction::SendOnly
        } else if attr.eq_ignore_ascii_case("recvonly") {
            Direction::RecvOnly
        } else if attr.eq_ignore_ascii_case("inactive") {
            Direction::Inactive
        } else {
            Direction::SendRecv
        }
    }

    /// True when the endpoint does not want to receive media.
    pub fn suppresses_receive(self) -> bool {
        matches!(self, Direction::Inactive | Direction::SendOnly)
    }
}

/// Payload type bookkeeping for one stream mode on one leg.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadInfo {
    /// RTP payload format number, `None` while unset
    pub format: Option<u8>,
    /// Mime subtype ("PCMU", "H264"), empty while unset
    pub mime: String,
}

impl PayloadInfo {
    /// Reset to the unset state.
    pub fn clear(&mut self) {
        self.format = None;
        self.mime.clear();
    }

    /// True once a format number has been negotiated.
    pub fn is_set(&self) -> bool {
        self.format.is_some()
    }
}
