//! RTSP `Transport:` response header parsing.
//!
//! The SETUP response's transport header is authoritative for where RTP will
//! actually originate, even when it disagrees with the SDP body's own
//! connection line, so the negotiator consumes this parsed form directly.

use crate::error::{Result, SdpError};

/// Parsed RTSP transport specification.
///
/// Example input:
/// `RTP/AVP;unicast;client_port=4588-4589;server_port=6256-6257;source=192.168.1.64`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtspTransport {
    /// Transport protocol token ("RTP/AVP", "RTP/AVP/UDP", ...)
    pub protocol: String,
    /// unicast parameter present
    pub unicast: bool,
    /// multicast parameter present
    pub multicast: bool,
    /// client_port range start (RTCP is start+1)
    pub client_port: Option<u16>,
    /// server_port range start (RTCP is start+1)
    pub server_port: Option<u16>,
    /// source address the server will send from
    pub source: Option<String>,
    /// destination address the server will send to
    pub destination: Option<String>,
    /// SSRC announced by the server
    pub ssrc: Option<u32>,
    /// interleaved channel pair start, when TCP interleaving was negotiated
    pub interleaved: Option<u16>,
    /// mode parameter ("play", "record")
    pub mode: Option<String>,
}

impl RtspTransport {
    /// Parse a transport header value.
    ///
    /// Unknown parameters are skipped; malformed port ranges (descending, or
    /// spanning more than the RTP/RTCP pair) are rejected.
    pub fn parse(header: &str) -> Result<RtspTransport> {
        let mut parts = header.split(';').map(str::trim);
        let protocol = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| bad(header, "empty header"))?;
        if !protocol.to_ascii_uppercase().starts_with("RTP/AVP") {
            return Err(bad(header, "unsupported protocol"));
        }

        let mut transport = RtspTransport {
            protocol: protocol.to_string(),
            ..RtspTransport::default()
        };

        for part in parts {
            if part.is_empty() {
                continue;
            }
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (part, None),
            };
            match key.to_ascii_lowercase().as_str() {
                "unicast" => transport.unicast = true,
                "multicast" => transport.multicast = true,
                "client_port" => {
                    transport.client_port = Some(parse_port_range(value, header)?);
                }
                "server_port" => {
                    transport.server_port = Some(parse_port_range(value, header)?);
                }
                "source" => {
                    transport.source = required(value, header)?;
                }
                "destination" => {
                    transport.destination = required(value, header)?;
                }
                "ssrc" => {
                    let v = value.ok_or_else(|| bad(header, "ssrc without value"))?;
                    transport.ssrc = Some(
                        u32::from_str_radix(v, 16).map_err(|_| bad(header, "bad ssrc"))?,
                    );
                }
                "interleaved" => {
                    transport.interleaved = Some(parse_port_range(value, header)?);
                }
                "mode" => {
                    transport.mode = value.map(|v| v.trim_matches('"').to_string());
                }
                _ => {}
            }
        }
        Ok(transport)
    }

    /// RTCP port paired with the server RTP port, saturating at the top of
    /// the port space.
    pub fn server_rtcp_port(&self) -> Option<u16> {
        self.server_port.map(|p| p.saturating_add(1))
    }
}

fn bad(header: &str, detail: &str) -> SdpError {
    SdpError::BadTransport {
        detail: format!("{} in {:?}", detail, header),
    }
}

fn required(value: Option<&str>, header: &str) -> Result<Option<String>> {
    match value {
        Some(v) if !v.is_empty() => Ok(Some(v.to_string())),
        _ => Err(bad(header, "parameter without value")),
    }
}

/// Parse "n" or "n-m" where m must be n or n+1, returning n.
fn parse_port_range(value: Option<&str>, header: &str) -> Result<u16> {
    let value = value.ok_or_else(|| bad(header, "port parameter without value"))?;
    let (from, to) = match value.split_once('-') {
        Some((f, t)) => (f.trim(), Some(t.trim())),
        None => (value, None),
    };
    let from: u16 = from.parse().map_err(|_| bad(header, "bad port number"))?;
    if let Some(to) = to {
        let to: u16 = to.parse().map_err(|_| bad(header, "bad port number"))?;
        if to < from || to > from.saturating_add(1) {
            return Err(bad(header, "port range is not an RTP/RTCP pair"));
        }
    }
    Ok(from)
}
