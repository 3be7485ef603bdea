//! Bridge configuration and port-range validation.
//!
//! The embedding process loads its own configuration file; this module only
//! defines the values the bridge consumes and the fallback rules for a
//! misconfigured RTP port range. Bad configuration is repaired with a
//! warning, never a panic.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default RTP port range start.
pub const DEFAULT_RTP_START_PORT: u16 = 9000;
/// Default RTP port range end.
pub const DEFAULT_RTP_END_PORT: u16 = 9100;
/// Default maximum number of concurrent SIP calls.
pub const DEFAULT_MAX_CALLS: usize = 3;
/// Default RTSP session timeout in seconds.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Configuration consumed by the media bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// First UDP port of the relay port range
    pub rtp_start_port: u16,
    /// Last UDP port of the relay port range
    pub rtp_end_port: u16,
    /// Learn remote media addresses from received packets (NAT traversal)
    pub symmetric_rtp: bool,
    /// Local IP facing the SIP endpoints
    pub sip_local_ip: IpAddr,
    /// Local IP facing the RTSP source
    pub rtsp_local_ip: IpAddr,
    /// Maximum number of concurrent calls in the table
    pub max_calls: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rtp_start_port: DEFAULT_RTP_START_PORT,
            rtp_end_port: DEFAULT_RTP_END_PORT,
            symmetric_rtp: true,
            sip_local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtsp_local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_calls: DEFAULT_MAX_CALLS,
        }
    }
}

impl BridgeConfig {
    /// Repair obviously invalid values in place, logging each fallback.
    ///
    /// An odd or privileged start port falls back to the default range; an
    /// end port too close to the start is clamped to leave room for at least
    /// four pairs; a zero call limit becomes the default.
    pub fn validate(mut self) -> BridgeConfig {
        if self.rtp_start_port % 2 != 0 || self.rtp_start_port <= 1024 {
            warn!(
                start = self.rtp_start_port,
                "invalid rtp_start_port, falling back to {}..{}",
                DEFAULT_RTP_START_PORT,
                DEFAULT_RTP_END_PORT
            );
            self.rtp_start_port = DEFAULT_RTP_START_PORT;
            self.rtp_end_port = DEFAULT_RTP_END_PORT;
        }
        match self.rtp_start_port.checked_add(8) {
            None => {
                warn!(
                    start = self.rtp_start_port,
                    "rtp_start_port leaves no room for a port range, falling back to {}..{}",
                    DEFAULT_RTP_START_PORT,
                    DEFAULT_RTP_END_PORT
                );
                self.rtp_start_port = DEFAULT_RTP_START_PORT;
                self.rtp_end_port = DEFAULT_RTP_END_PORT;
            }
            Some(min_end) if self.rtp_end_port < min_end => {
                warn!(
                    end = self.rtp_end_port,
                    "rtp_end_port too close to start, clamping to {}", min_end
                );
                self.rtp_end_port = min_end;
            }
            Some(_) => {}
        }
        if self.max_calls == 0 {
            warn!("max_calls of 0 makes the gateway useless, using {}", DEFAULT_MAX_CALLS);
            self.max_calls = DEFAULT_MAX_CALLS;
        }
        self
    }
}
