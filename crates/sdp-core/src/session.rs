//! Owned, mutable SDP document model.
//!
//! The negotiator in the bridge rewrites an RTSP answer into a SIP answer by
//! mutating a clone of this model in place: origin/connection addresses, media
//! ports, and payload-format numbers. All mutation goes through the methods
//! here so a failed negotiation can simply discard its copy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Origin (o=) field.
///
/// Format: `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Username of the originator (often "-")
    pub username: String,
    /// Session ID
    pub sess_id: String,
    /// Session version
    pub sess_version: String,
    /// Network type (typically "IN")
    pub net_type: String,
    /// Address type ("IP4" or "IP6")
    pub addr_type: String,
    /// Unicast address
    pub unicast_address: String,
}

/// Connection data (c=) field.
///
/// Format: `c=<nettype> <addrtype> <connection-address>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    /// Network type (typically "IN")
    pub net_type: String,
    /// Address type ("IP4" or "IP6")
    pub addr_type: String,
    /// Connection address
    pub connection_address: String,
}

impl ConnectionData {
    /// IPv4 connection data for the given address.
    pub fn ip4(addr: impl Into<String>) -> Self {
        Self {
            net_type: "IN".to_string(),
            addr_type: "IP4".to_string(),
            connection_address: addr.into(),
        }
    }
}

/// Time description (t=) field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDescription {
    /// Start time (0 means permanent)
    pub start_time: String,
    /// Stop time (0 means open-ended)
    pub stop_time: String,
}

/// A generic attribute (a=) line: either a flag (`a=sendrecv`) or a
/// field/value pair (`a=rtpmap:96 H264/90000`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAttribute {
    /// Attribute name
    pub field: String,
    /// Attribute value, absent for flag attributes
    pub value: Option<String>,
}

impl SdpAttribute {
    /// Flag attribute without a value.
    pub fn flag(field: impl Into<String>) -> Self {
        Self { field: field.into(), value: None }
    }

    /// Field/value attribute.
    pub fn value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { field: field.into(), value: Some(value.into()) }
    }

    /// The leading integer of the attribute value, when it has one.
    ///
    /// `a=rtpmap:96 H264/90000` yields `Some((96, "H264/90000"))`.
    pub fn leading_payload(&self) -> Option<(u8, &str)> {
        let value = self.value.as_deref()?;
        let end = value.find(|c: char| !c.is_ascii_digit())?;
        let pt = value[..end].parse().ok()?;
        Some((pt, value[end..].trim_start()))
    }
}

/// One media section (m= line plus its c=/a= lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    /// Media type ("audio", "video", ...)
    pub media: String,
    /// Transport port
    pub port: u16,
    /// Transport protocol ("RTP/AVP")
    pub protocol: String,
    /// Payload format list as it appears on the m= line
    pub formats: Vec<String>,
    /// Media-level connection data, overrides the session-level c=
    pub connection: Option<ConnectionData>,
    /// Media-level attributes in document order
    pub attributes: Vec<SdpAttribute>,
}

impl MediaDescription {
    /// Create a media section.
    pub fn new(
        media: impl Into<String>,
        port: u16,
        protocol: impl Into<String>,
        formats: Vec<String>,
    ) -> Self {
        Self {
            media: media.into(),
            port,
            protocol: protocol.into(),
            formats,
            connection: None,
            attributes: Vec::new(),
        }
    }

    /// True if this section is of the given media type (case-insensitive).
    pub fn is_kind(&self, kind: &str) -> bool {
        self.media.eq_ignore_ascii_case(kind)
    }

    /// First payload format number on the m= line.
    pub fn first_format(&self) -> Option<u8> {
        self.formats.first().and_then(|f| f.parse().ok())
    }

    /// Media-level connection address, if present.
    pub fn connection_address(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.connection_address.as_str())
    }

    /// Replace (or add) the media-level connection address.
    pub fn set_connection_address(&mut self, addr: &str) {
        match &mut self.connection {
            Some(conn) => conn.connection_address = addr.to_string(),
            None => self.connection = Some(ConnectionData::ip4(addr)),
        }
    }

    /// Add an attribute line.
    pub fn push_attribute(&mut self, attr: SdpAttribute) {
        self.attributes.push(attr);
    }

    /// Value of the first attribute named `field` whose value leads with
    /// payload number `pt`, with the number stripped.
    ///
    /// `attr_value_for_payload("rtpmap", 96)` on `a=rtpmap:96 H264/90000`
    /// returns `Some("H264/90000")`.
    pub fn attr_value_for_payload(&self, field: &str, pt: u8) -> Option<&str> {
        self.attributes
            .iter()
            .filter(|a| a.field.eq_ignore_ascii_case(field))
            .filter_map(|a| a.leading_payload())
            .find(|(num, rest)| *num == pt && !rest.is_empty())
            .map(|(_, rest)| rest)
    }

    /// The rtpmap value for payload `pt` (e.g. "PCMA/8000").
    pub fn rtpmap_for(&self, pt: u8) -> Option<&str> {
        self.attr_value_for_payload("rtpmap", pt)
    }

    /// The direction flag attribute of this section, if any.
    ///
    /// Later flags win, matching how permissive stacks read duplicate lines.
    pub fn direction_attr(&self) -> Option<&str> {
        const DIRS: [&str; 4] = ["sendrecv", "sendonly", "recvonly", "inactive"];
        self.attributes
            .iter()
            .rev()
            .find(|a| DIRS.iter().any(|d| a.field.eq_ignore_ascii_case(d)))
            .map(|a| a.field.as_str())
    }

    /// Renumber payload format `old` to `new` across the section.
    ///
    /// Rewrites the m= format list entry and every attribute whose value
    /// leads with `old`, keeping the rest of each attribute line verbatim.
    pub fn renumber_format(&mut self, old: u8, new: u8) {
        let old_str = old.to_string();
        for fmt in &mut self.formats {
            if *fmt == old_str {
                *fmt = new.to_string();
            }
        }
        for attr in &mut self.attributes {
            if let Some((num, rest)) = attr.leading_payload() {
                if num == old && !rest.is_empty() {
                    attr.value = Some(format!("{} {}", new, rest));
                }
            }
        }
    }
}

/// A complete SDP session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpSession {
    /// Protocol version (v=), "0" in practice
    pub version: String,
    /// Origin (o=)
    pub origin: Origin,
    /// Session name (s=)
    pub session_name: String,
    /// Session-level connection data (c=)
    pub connection: Option<ConnectionData>,
    /// Time descriptions (t=)
    pub times: Vec<TimeDescription>,
    /// Session-level attributes
    pub attributes: Vec<SdpAttribute>,
    /// Media sections in document order
    pub media: Vec<MediaDescription>,
}

impl SdpSession {
    /// New session with the mandatory origin and name; permanent timing.
    pub fn new(origin: Origin, session_name: impl Into<String>) -> Self {
        Self {
            version: "0".to_string(),
            origin,
            session_name: session_name.into(),
            connection: None,
            times: vec![TimeDescription {
                start_time: "0".to_string(),
                stop_time: "0".to_string(),
            }],
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Session-level connection address, if present.
    pub fn connection_address(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.connection_address.as_str())
    }

    /// Replace (or add) the session-level connection address.
    pub fn set_connection_address(&mut self, addr: &str) {
        match &mut self.connection {
            Some(conn) => conn.connection_address = addr.to_string(),
            None => self.connection = Some(ConnectionData::ip4(addr)),
        }
    }

    /// Replace the origin unicast address.
    pub fn set_origin_address(&mut self, addr: &str) {
        self.origin.unicast_address = addr.to_string();
    }

    /// Append a media section.
    pub fn add_media(&mut self, media: MediaDescription) {
        self.media.push(media);
    }

    /// First media section of the given type.
    pub fn media_of_kind(&self, kind: &str) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.is_kind(kind))
    }

    /// First media section of the given type, mutable.
    pub fn media_of_kind_mut(&mut self, kind: &str) -> Option<&mut MediaDescription> {
        self.media.iter_mut().find(|m| m.is_kind(kind))
    }

    /// The connection address effective for a media section: the media-level
    /// c= when present, else the session-level one.
    pub fn effective_connection_address<'a>(
        &'a self,
        media: &'a MediaDescription,
    ) -> Option<&'a str> {
        media.connection_address().or_else(|| self.connection_address())
    }

    /// Remove every media section of the given type. Returns how many were
    /// removed.
    pub fn remove_media(&mut self, kind: &str) -> usize {
        let before = self.media.len();
        self.media.retain(|m| !m.is_kind(kind));
        before - self.media.len()
    }

    /// Move audio ahead of video when video currently precedes it.
    ///
    /// Returns true if the order changed.
    pub fn reorder_audio_first(&mut self) -> bool {
        let audio = self.media.iter().position(|m| m.is_kind("audio"));
        let video = self.media.iter().position(|m| m.is_kind("video"));
        if let (Some(a), Some(v)) = (audio, video) {
            if v < a {
                let section = self.media.remove(a);
                self.media.insert(0, section);
                return true;
            }
        }
        false
    }
}

impl fmt::Display for SdpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "v={}\r", self.version)?;
        writeln!(
            f,
            "o={} {} {} {} {} {}\r",
            self.origin.username,
            self.origin.sess_id,
            self.origin.sess_version,
            self.origin.net_type,
            self.origin.addr_type,
            self.origin.unicast_address
        )?;
        writeln!(f, "s={}\r", self.session_name)?;
        if let Some(conn) = &self.connection {
            writeln!(
                f,
                "c={} {} {}\r",
                conn.net_type, conn.addr_type, conn.connection_address
            )?;
        }
        for t in &self.times {
            writeln!(f, "t={} {}\r", t.start_time, t.stop_time)?;
        }
        for attr in &self.attributes {
            write_attribute(f, attr)?;
        }
        for media in &self.media {
            write!(f, "m={} {} {}", media.media, media.port, media.protocol)?;
            for fmt_entry in &media.formats {
                write!(f, " {}", fmt_entry)?;
            }
            writeln!(f, "\r")?;
            if let Some(conn) = &media.connection {
                writeln!(
                    f,
                    "c={} {} {}\r",
                    conn.net_type, conn.addr_type, conn.connection_address
                )?;
            }
            for attr in &media.attributes {
                write_attribute(f, attr)?;
            }
        }
        Ok(())
    }
}

fn write_attribute(f: &mut fmt::Formatter<'_>, attr: &SdpAttribute) -> fmt::Result {
    match &attr.value {
        Some(value) => writeln!(f, "a={}:{}\r", attr.field, value),
        None => writeln!(f, "a={}\r", attr.field),
    }
}
