//! The in-memory OpenLCB message record (§3, §9 Design Notes).
//!
//! A message is an MTI plus a source, an optional destination, and a
//! variable-length payload. The payload itself lives in one of the
//! [`buffer`](crate::buffer) pool's four segregated arrays; a [`Message`]
//! only carries a lightweight [`PayloadHandle`] (class + index), the
//! `(pointer, pointer)` pair of the original design mapped onto an owned
//! handle instead of a raw pointer.

use crate::buffer::PayloadHandle;
use crate::mti::Mti;
use openlcb_core::{Alias, NodeId};

/// Which of the buffer pool's four segregated arrays a payload was drawn
/// from, matching the size classes actually seen on the wire (§3, §4.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PayloadClass {
    /// At most 8 bytes: global/addressed control-plane messages, single CAN frame.
    Basic,
    /// At most 72 bytes: datagrams and configuration memory transfers.
    Datagram,
    /// At most 253 bytes: SNIP and ACDI strings.
    Snip,
    /// Host-defined size, used for stream transfers; not sized by this crate.
    Stream,
}

impl PayloadClass {
    /// The maximum payload length this class holds, or `None` for [`PayloadClass::Stream`].
    pub const fn max_len(self) -> Option<usize> {
        match self {
            PayloadClass::Basic => Some(8),
            PayloadClass::Datagram => Some(72),
            PayloadClass::Snip => Some(253),
            PayloadClass::Stream => None,
        }
    }

    /// Picks the smallest class that can hold `len` bytes, or `None` if no
    /// fixed class is large enough (the caller should fall back to a stream).
    pub const fn smallest_fit(len: usize) -> Option<Self> {
        if len <= 8 {
            Some(PayloadClass::Basic)
        } else if len <= 72 {
            Some(PayloadClass::Datagram)
        } else if len <= 253 {
            Some(PayloadClass::Snip)
        } else {
            None
        }
    }
}

/// The destination of an addressed message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    /// The destination node's current CAN alias.
    pub alias: Alias,
    /// The destination node id, when known (not always resolved for CAN-only
    /// routing; §4.5).
    pub node_id: Option<NodeId>,
}

/// A fully assembled OpenLCB message, ready for dispatch or transmission.
///
/// Every field is `Copy`, so a [`Message`] is a cheap value the dispatcher
/// can hold onto across several main-loop iterations while it walks the
/// same incoming message against each hosted node in turn (§4.6); the
/// payload bytes themselves stay put in the buffer pool behind
/// [`PayloadHandle`].
#[derive(Copy, Clone, Debug)]
pub struct Message {
    mti: Mti,
    source_alias: Alias,
    source_node_id: Option<NodeId>,
    dest: Option<Destination>,
    payload: PayloadHandle,
}

impl Message {
    /// Builds a message record around an already-filled payload buffer.
    pub fn new(
        mti: Mti,
        source_alias: Alias,
        source_node_id: Option<NodeId>,
        dest: Option<Destination>,
        payload: PayloadHandle,
    ) -> Self {
        Self {
            mti,
            source_alias,
            source_node_id,
            dest,
            payload,
        }
    }

    /// The message's MTI.
    pub fn mti(&self) -> Mti {
        self.mti
    }

    /// The CAN alias of the sending node.
    pub fn source_alias(&self) -> Alias {
        self.source_alias
    }

    /// The node id of the sending node, if resolved.
    pub fn source_node_id(&self) -> Option<NodeId> {
        self.source_node_id
    }

    /// The message's destination, for addressed MTIs.
    pub fn dest(&self) -> Option<Destination> {
        self.dest
    }

    /// The handle identifying where this message's payload bytes live.
    pub fn payload_handle(&self) -> PayloadHandle {
        self.payload
    }

    /// `true` if this message is addressed to a specific node rather than
    /// broadcast to the segment.
    pub fn is_addressed(&self) -> bool {
        self.mti.is_addressed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_fit_picks_basic_for_short_payloads() {
        assert_eq!(PayloadClass::smallest_fit(6), Some(PayloadClass::Basic));
        assert_eq!(PayloadClass::smallest_fit(8), Some(PayloadClass::Basic));
    }

    #[test]
    fn smallest_fit_picks_datagram_for_medium_payloads() {
        assert_eq!(PayloadClass::smallest_fit(9), Some(PayloadClass::Datagram));
        assert_eq!(PayloadClass::smallest_fit(72), Some(PayloadClass::Datagram));
    }

    #[test]
    fn smallest_fit_gives_up_past_snip() {
        assert_eq!(PayloadClass::smallest_fit(254), None);
    }
}
