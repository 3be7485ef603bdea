//! Line-oriented SDP parser feeding the document model.
//!
//! Only the lines the gateway acts on are retained: v=, o=, s=, c=, t=, a=
//! and m= sections. Everything else is skipped. Parsing is permissive about
//! line endings (CRLF or LF) and unknown attribute fields.

use crate::error::{Result, SdpError};
use crate::session::{
    ConnectionData, MediaDescription, Origin, SdpAttribute, SdpSession, TimeDescription,
};

impl SdpSession {
    /// Parse an SDP body.
    ///
    /// Fails on a malformed v=/o=/c=/m= line or when the mandatory origin is
    /// absent; unknown line types are ignored.
    pub fn parse(input: &str) -> Result<SdpSession> {
        let mut version = None;
        let mut origin = None;
        let mut session_name = String::new();
        let mut connection = None;
        let mut times = Vec::new();
        let mut attributes = Vec::new();
        let mut media: Vec<MediaDescription> = Vec::new();

        for raw in input.lines() {
            let line = raw.trim_end_matches('\r');
            if line.len() < 2 || line.as_bytes().get(1) != Some(&b'=') {
                continue;
            }
            let value = &line[2..];
            match line.as_bytes()[0] {
                b'v' => {
                    if value.parse::<u32>().is_err() {
                        return Err(SdpError::Parse { line: line.to_string() });
                    }
                    version = Some(value.to_string());
                }
                b'o' => origin = Some(parse_origin(value, line)?),
                b's' => session_name = value.to_string(),
                b'c' => {
                    let conn = parse_connection(value, line)?;
                    match media.last_mut() {
                        Some(section) => section.connection = Some(conn),
                        None => connection = Some(conn),
                    }
                }
                b't' => {
                    let mut parts = value.split_whitespace();
                    if let (Some(start), Some(stop)) = (parts.next(), parts.next()) {
                        times.push(TimeDescription {
                            start_time: start.to_string(),
                            stop_time: stop.to_string(),
                        });
                    }
                }
                b'a' => {
                    let attr = parse_attribute(value);
                    match media.last_mut() {
                        Some(section) => section.attributes.push(attr),
                        None => attributes.push(attr),
                    }
                }
                b'm' => media.push(parse_media(value, line)?),
                _ => {}
            }
        }

        Ok(SdpSession {
            version: version.ok_or(SdpError::MissingField { field: "v" })?,
            origin: origin.ok_or(SdpError::MissingField { field: "o" })?,
            session_name,
            connection,
            times,
            attributes,
            media,
        })
    }
}

fn parse_origin(value: &str, line: &str) -> Result<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(SdpError::Parse { line: line.to_string() });
    }
    Ok(Origin {
        username: parts[0].to_string(),
        sess_id: parts[1].to_string(),
        sess_version: parts[2].to_string(),
        net_type: parts[3].to_string(),
        addr_type: parts[4].to_string(),
        unicast_address: parts[5].to_string(),
    })
}

fn parse_connection(value: &str, line: &str) -> Result<ConnectionData> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(SdpError::Parse { line: line.to_string() });
    }
    Ok(ConnectionData {
        net_type: parts[0].to_string(),
        addr_type: parts[1].to_string(),
        // Strip a TTL/count suffix; the bridge only ever needs the address.
        connection_address: parts[2].split('/').next().unwrap_or(parts[2]).to_string(),
    })
}

fn parse_attribute(value: &str) -> SdpAttribute {
    match value.split_once(':') {
        Some((field, rest)) => SdpAttribute::value(field, rest),
        None => SdpAttribute::flag(value),
    }
}

fn parse_media(value: &str, line: &str) -> Result<MediaDescription> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(SdpError::Parse { line: line.to_string() });
    }
    let port = parts[1]
        .split('/')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| SdpError::Parse { line: line.to_string() })?;
    Ok(MediaDescription {
        media: parts[0].to_string(),
        port,
        protocol: parts[2].to_string(),
        formats: parts[3..].iter().map(|s| s.to_string()).collect(),
        connection: None,
        attributes: Vec::new(),
    })
}
