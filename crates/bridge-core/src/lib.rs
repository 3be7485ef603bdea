//! Media bridge between SIP callers and a single RTSP stream.
//!
//! The crate glues a SIP signaling stack to an RTSP source: calls are
//! admitted into a bounded table, each one gets its own pair of relay legs
//! from a cycling UDP port pool, SDP offer/answer is rewritten so the caller
//! talks to the bridge instead of the camera, and a single-task relay loop
//! shuttles RTP/RTCP between the two sides with on-the-fly payload-type
//! translation and symmetric-RTP address learning.
//!
//! The embedding process supplies the RTSP control plane through the
//! [`RtspSource`] trait and drives everything from one loop:
//! [`Gateway::on_new_call`] and friends for signaling events,
//! [`Gateway::poll_media`] continuously for packets, and
//! [`Gateway::keepalive`] on the pace of [`Gateway::keepalive_interval`].

mod call;
mod config;
mod error;
mod gateway;
mod leg;
mod negotiate;
mod port;
mod relay;
mod rtp;
mod rtsp;
mod types;

pub use call::{Admission, CallTable, SipCall};
pub use config::{
    BridgeConfig, DEFAULT_MAX_CALLS, DEFAULT_RTP_END_PORT, DEFAULT_RTP_START_PORT,
    DEFAULT_SESSION_TIMEOUT_SECS,
};
pub use error::{Error, Result};
pub use gateway::{Gateway, NewCallOutcome};
pub use leg::{Endpoint, MediaLeg};
pub use negotiate::{OfferSummary, OfferedMedia};
pub use port::PortPool;
pub use relay::{Relay, POLL_TIMEOUT};
pub use rtsp::{EndpointHint, RtspOpenResponse, RtspSource};
pub use types::{CallId, DialogId, Direction, MediaKind, PayloadInfo, StreamMode};
