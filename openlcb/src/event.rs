//! Event Transport: Producer/Consumer Event Reports and the
//! Identify/Identified/Range message family (§4.9).

use crate::mti::Mti;
use openlcb_core::{EventId, NodeId};

/// The validity state a node reports for one of its producer or consumer
/// events, per the Identified reply it sends (§4.9).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventState {
    /// The node cannot currently say whether the event is set or clear.
    Unknown,
    /// The event condition is currently set/true/on.
    Valid,
    /// The event condition is currently clear/false/off.
    Invalid,
    /// The id names a class of events rather than one specific occurrence.
    Reserved,
}

impl EventState {
    /// The Producer Identified MTI carrying this validity state.
    pub const fn producer_identified_mti(self) -> Mti {
        match self {
            EventState::Unknown => Mti::PRODUCER_IDENTIFIED_UNKNOWN,
            EventState::Valid => Mti::PRODUCER_IDENTIFIED_VALID,
            EventState::Invalid | EventState::Reserved => Mti::PRODUCER_IDENTIFIED_INVALID,
        }
    }

    /// The Consumer Identified MTI carrying this validity state.
    pub const fn consumer_identified_mti(self) -> Mti {
        match self {
            EventState::Unknown => Mti::CONSUMER_IDENTIFIED_UNKNOWN,
            EventState::Valid => Mti::CONSUMER_IDENTIFIED_VALID,
            EventState::Invalid | EventState::Reserved => Mti::CONSUMER_IDENTIFIED_INVALID,
        }
    }
}

/// The auto-numbered producer event a node owns at `index`, following the
/// `(node_id << 16) | index` convention used for login-time announcements
/// (§4.4, §9 Design Notes).
pub fn producer_event_id(node: NodeId, index: usize) -> EventId {
    EventId::from_node_and_suffix(node, index as u16)
}

/// The auto-numbered consumer event a node owns at `index`.
pub fn consumer_event_id(node: NodeId, index: usize) -> EventId {
    EventId::from_node_and_suffix(node, 0x8000 | index as u16)
}

/// The 8-byte payload of a PC Event Report, Identified, or Identify
/// message: just the event id, big-endian.
pub fn event_payload(event: EventId) -> [u8; 8] {
    event.to_be_bytes()
}

/// Encodes a registered event *range* as a base event id with a
/// run-length-of-1-bits mask, per the OpenLCB event-range convention: the
/// lowest cleared bit of `base`'s suffix marks the boundary of the range
/// (§4.9).
pub fn range_base_and_mask(first: EventId, count: u64) -> EventId {
    debug_assert!(count.is_power_of_two() || count == 0);
    let mask = count.saturating_sub(1);
    EventId::new(first.raw() | mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_and_consumer_suffixes_do_not_collide() {
        let node = NodeId::new(0x0102_0304_0506);
        assert_ne!(producer_event_id(node, 0), consumer_event_id(node, 0));
    }

    #[test]
    fn valid_state_maps_to_valid_mtis() {
        assert_eq!(EventState::Valid.producer_identified_mti(), Mti::PRODUCER_IDENTIFIED_VALID);
        assert_eq!(EventState::Valid.consumer_identified_mti(), Mti::CONSUMER_IDENTIFIED_VALID);
    }

    #[test]
    fn event_range_mask_covers_a_power_of_two_block() {
        let base = EventId::new(0x0102_0304_0506_0000);
        let range = range_base_and_mask(base, 16);
        assert_eq!(range.raw() & 0xF, 0xF);
    }
}
