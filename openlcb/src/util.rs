//! Big-endian payload pack/unpack helpers (§3, §8).
//!
//! OpenLCB payloads are unstructured byte strings; multi-byte fields are
//! always big-endian. These helpers give the rest of the crate a single,
//! tested place to get that right, mirroring the small utility surface of
//! `openlcb_utilities.h` (`copy_*_to_openlcb_payload` / `extract_*_from_openlcb_payload`).

use openlcb_core::{EventId, NodeId};

/// Appends a node id as 6 big-endian bytes, returning the number of bytes
/// written (0 if `buf` has no room for all 6).
pub fn push_node_id(buf: &mut [u8], node: NodeId) -> usize {
    let bytes = node.to_be_bytes();
    if buf.len() < bytes.len() {
        return 0;
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    bytes.len()
}

/// Appends an event id as 8 big-endian bytes.
pub fn push_event_id(buf: &mut [u8], event: EventId) -> usize {
    let bytes = event.to_be_bytes();
    if buf.len() < bytes.len() {
        return 0;
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    bytes.len()
}

/// Appends a big-endian `u16`.
pub fn push_u16(buf: &mut [u8], value: u16) -> usize {
    let bytes = value.to_be_bytes();
    if buf.len() < bytes.len() {
        return 0;
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    bytes.len()
}

/// Appends a big-endian `u32`.
pub fn push_u32(buf: &mut [u8], value: u32) -> usize {
    let bytes = value.to_be_bytes();
    if buf.len() < bytes.len() {
        return 0;
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    bytes.len()
}

/// Reads a node id from the first 6 bytes of `buf`. Panics in debug if
/// `buf` is shorter than 6 bytes — callers must size-check first (§7, a
/// malformed payload here is a protocol violation, not a recoverable error).
pub fn extract_node_id(buf: &[u8]) -> NodeId {
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&buf[..6]);
    NodeId::from_be_bytes(bytes)
}

/// Reads an event id from the first 8 bytes of `buf`.
pub fn extract_event_id(buf: &[u8]) -> EventId {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    EventId::from_be_bytes(bytes)
}

/// Reads a big-endian `u16` from the first 2 bytes of `buf`.
pub fn extract_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Reads a big-endian `u32` from the first 4 bytes of `buf`.
pub fn extract_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Counts every `0x00` byte anywhere in `payload`, the SNIP/ACDI string
/// terminator convention (§4.6 Open Question): each of SNIP's null-terminated
/// fields contributes one terminator to the running total regardless of
/// position, so a reassembler recognizes completion by the cumulative count
/// reaching the expected total, not by a trailing run.
pub fn count_nulls(payload: &[u8]) -> usize {
    payload.iter().filter(|&&b| b == 0).count()
}
