//! Small pure helpers for replies that do not need any node or host state
//! beyond their own arguments, kept separate from [`super`]'s stateful
//! orchestration so they can be tested in isolation.

use crate::mti::Mti;

/// The error code this engine reports in an Optional Interaction Rejected
/// reply: the addressed MTI named no handler this node installs.
///
/// This is this engine's own compact choice, not a transcription of the
/// full standard error-code appendix: it reuses the "not implemented"
/// family already defined for datagrams (§6) since the shape (a 16-bit
/// code) and meaning (this node does not do that) match.
pub const UNIMPLEMENTED_INTERACTION_ERROR: u16 = 0x1040;

/// Builds the payload for an Optional Interaction Rejected reply: the
/// error code followed by the MTI that went unanswered, both big-endian.
pub fn rejected_interaction_payload(rejected: Mti) -> [u8; 4] {
    let code = UNIMPLEMENTED_INTERACTION_ERROR.to_be_bytes();
    let mti = rejected.raw().to_be_bytes();
    [code[0], code[1], mti[0], mti[1]]
}

/// Builds the 6-byte Protocol Support Reply payload.
///
/// This is a compact bit assignment of this engine's own (bits for the
/// protocols this crate actually implements), not a transcription of the
/// standard's full 48-bit protocol identification table.
pub fn protocol_support_payload(
    datagram: bool,
    memory_config: bool,
    event_exchange: bool,
    simple_node_ident: bool,
) -> [u8; 6] {
    let mut top: u8 = 0;
    if simple_node_ident {
        top |= 0x80;
    }
    if datagram {
        top |= 0x40;
    }
    if memory_config {
        top |= 0x20;
    }
    if event_exchange {
        top |= 0x10;
    }
    [top, 0, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_payload_carries_code_then_mti() {
        let payload = rejected_interaction_payload(Mti::SIMPLE_NODE_IDENT_INFO_REQUEST);
        assert_eq!(&payload[..2], &UNIMPLEMENTED_INTERACTION_ERROR.to_be_bytes());
        assert_eq!(&payload[2..], &Mti::SIMPLE_NODE_IDENT_INFO_REQUEST.raw().to_be_bytes());
    }

    #[test]
    fn protocol_support_sets_only_requested_bits() {
        let payload = protocol_support_payload(true, false, true, false);
        assert_eq!(payload[0], 0x40 | 0x10);
        assert_eq!(&payload[1..], &[0, 0, 0, 0, 0]);
    }
}
