//! Minimal RTP fixed-header access.
//!
//! The relay never decodes RTP beyond the two header fields it acts on: the
//! version check and the payload-type rewrite. Sequence number, timestamp
//! and SSRC pass through untouched.

/// Minimum RTP fixed header length in bytes.
pub const MIN_HEADER_LEN: usize = 12;

/// RTP version field of a packet. Callers must have checked the length.
pub fn version(packet: &[u8]) -> u8 {
    packet[0] >> 6
}

/// RTP payload type field (7 bits, marker bit excluded).
pub fn payload_type(packet: &[u8]) -> u8 {
    packet[1] & 0x7f
}

/// Overwrite the payload type field, preserving the marker bit.
pub fn set_payload_type(packet: &mut [u8], pt: u8) {
    packet[1] = (packet[1] & 0x80) | (pt & 0x7f);
}
