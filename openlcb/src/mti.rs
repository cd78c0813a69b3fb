//! Message Type Indicator constants and classification (§3, §4.4).

/// A 12-bit Message Type Indicator, carried in the CAN identifier of every
/// OpenLCB frame that is not a CAN-control frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mti(u16);

impl Mti {
    /// Builds an MTI from its raw 12-bit value.
    pub const fn new(raw: u16) -> Self {
        Self(raw & 0x0FFF)
    }

    /// The raw 12-bit value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// `true` if bit 0x0008 (the "addressed" bit) is set, meaning the first
    /// two payload bytes carry a destination alias (§3, `is_addressed_openlcb_message`).
    pub const fn is_addressed(self) -> bool {
        self.0 & 0x0008 != 0
    }

    /// `true` if this MTI requires the sender to hold a valid, non-duplicate
    /// alias before it may be sent (almost everything but a handful of
    /// bootstrap frames).
    pub const fn requires_valid_alias(self) -> bool {
        !matches!(self, Self::INITIALIZATION_COMPLETE_SIMPLE)
    }

    /// `true` for the Datagram and Datagram-Rejected/Received-OK MTIs.
    pub const fn is_datagram(self) -> bool {
        matches!(self, Self::DATAGRAM | Self::DATAGRAM_OK_REPLY | Self::DATAGRAM_REJECTED_REPLY)
    }

    /// `true` for any variant of Producer/Consumer Identify(ied) or a PC
    /// Event Report. Identify Events and Learn Event are their own thing
    /// and are not included here.
    pub const fn is_event_transport(self) -> bool {
        matches!(
            self,
            Self::PC_EVENT_REPORT
                | Self::PC_EVENT_REPORT_WITH_PAYLOAD
                | Self::CONSUMER_IDENTIFY
                | Self::CONSUMER_IDENTIFIED_UNKNOWN
                | Self::CONSUMER_IDENTIFIED_VALID
                | Self::CONSUMER_IDENTIFIED_INVALID
                | Self::CONSUMER_IDENTIFIED_RANGE
                | Self::PRODUCER_IDENTIFY
                | Self::PRODUCER_IDENTIFIED_UNKNOWN
                | Self::PRODUCER_IDENTIFIED_VALID
                | Self::PRODUCER_IDENTIFIED_INVALID
                | Self::PRODUCER_IDENTIFIED_RANGE
        )
    }

    // -- Core and CAN-control MTIs (§3, §4.5) --

    /// Simple Node Ident Info Request.
    pub const SIMPLE_NODE_IDENT_INFO_REQUEST: Mti = Mti(0x0DE8);
    /// Simple Node Ident Info Reply.
    pub const SIMPLE_NODE_IDENT_INFO_REPLY: Mti = Mti(0x0A08);

    /// Verify Node Id Number, addressed.
    pub const VERIFY_NODE_ID_ADDRESSED: Mti = Mti(0x0488);
    /// Verify Node Id Number, global.
    pub const VERIFY_NODE_ID_GLOBAL: Mti = Mti(0x0490);
    /// Verified Node Id Number.
    pub const VERIFIED_NODE_ID: Mti = Mti(0x0170);

    /// Initialization Complete (full protocol support).
    pub const INITIALIZATION_COMPLETE: Mti = Mti(0x0100);
    /// Initialization Complete (simple, §4.6 bootstrap).
    pub const INITIALIZATION_COMPLETE_SIMPLE: Mti = Mti(0x0101);

    /// Protocol Support Inquiry.
    pub const PROTOCOL_SUPPORT_INQUIRY: Mti = Mti(0x0828);
    /// Protocol Support Reply.
    pub const PROTOCOL_SUPPORT_REPLY: Mti = Mti(0x0668);

    /// Optional Interaction Rejected.
    pub const OPTIONAL_INTERACTION_REJECTED: Mti = Mti(0x0068);
    /// Terminate Due To Error.
    pub const TERMINATE_DUE_TO_ERROR: Mti = Mti(0x00A8);

    // -- Datagram (§4.9) --

    /// Datagram.
    pub const DATAGRAM: Mti = Mti(0x1C48);
    /// Datagram Received OK.
    pub const DATAGRAM_OK_REPLY: Mti = Mti(0x0A28);
    /// Datagram Rejected.
    pub const DATAGRAM_REJECTED_REPLY: Mti = Mti(0x0A48);

    // -- Event transport (§4.7) --

    /// Producer Consumer Event Report.
    pub const PC_EVENT_REPORT: Mti = Mti(0x05B4);
    /// Producer Consumer Event Report with payload.
    pub const PC_EVENT_REPORT_WITH_PAYLOAD: Mti = Mti(0x0F15);
    /// Consumer Identify.
    pub const CONSUMER_IDENTIFY: Mti = Mti(0x08F4);
    /// Consumer Identified, unknown validity.
    pub const CONSUMER_IDENTIFIED_UNKNOWN: Mti = Mti(0x04A4);
    /// Consumer Identified, valid.
    pub const CONSUMER_IDENTIFIED_VALID: Mti = Mti(0x04C4);
    /// Consumer Identified, invalid.
    pub const CONSUMER_IDENTIFIED_INVALID: Mti = Mti(0x04C7);
    /// Consumer Range Identified.
    pub const CONSUMER_IDENTIFIED_RANGE: Mti = Mti(0x04A8);
    /// Producer Identify.
    pub const PRODUCER_IDENTIFY: Mti = Mti(0x0914);
    /// Producer Identified, unknown validity.
    pub const PRODUCER_IDENTIFIED_UNKNOWN: Mti = Mti(0x0547);
    /// Producer Identified, valid.
    pub const PRODUCER_IDENTIFIED_VALID: Mti = Mti(0x0544);
    /// Producer Identified, invalid.
    pub const PRODUCER_IDENTIFIED_INVALID: Mti = Mti(0x0548);
    /// Producer Range Identified.
    pub const PRODUCER_IDENTIFIED_RANGE: Mti = Mti(0x0524);
    /// Identify Events Addressed.
    pub const IDENTIFY_EVENTS_ADDRESSED: Mti = Mti(0x0968);
    /// Identify Events Global.
    pub const IDENTIFY_EVENTS_GLOBAL: Mti = Mti(0x0970);
    /// Learn Event.
    pub const LEARN_EVENT: Mti = Mti(0x0594);

    // -- Traction / Simple train, not exercised directly --

    /// Remote Button Request.
    pub const TRACTION_CONTROL_COMMAND: Mti = Mti(0x05EB);
    /// Remote Button Reply.
    pub const TRACTION_CONTROL_REPLY: Mti = Mti(0x0EB0);
}

impl From<u16> for Mti {
    fn from(raw: u16) -> Self {
        Mti::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressed_bit_matches_known_mtis() {
        assert!(Mti::SIMPLE_NODE_IDENT_INFO_REQUEST.is_addressed());
        assert!(Mti::DATAGRAM.is_addressed());
        assert!(!Mti::PC_EVENT_REPORT.is_addressed());
        assert!(!Mti::INITIALIZATION_COMPLETE.is_addressed());
    }

    #[test]
    fn bootstrap_mti_does_not_require_alias() {
        assert!(!Mti::INITIALIZATION_COMPLETE_SIMPLE.requires_valid_alias());
        assert!(Mti::INITIALIZATION_COMPLETE.requires_valid_alias());
    }

    #[test]
    fn datagram_classification() {
        assert!(Mti::DATAGRAM.is_datagram());
        assert!(Mti::DATAGRAM_OK_REPLY.is_datagram());
        assert!(!Mti::PC_EVENT_REPORT.is_datagram());
    }

    #[test]
    fn event_transport_classification() {
        assert!(Mti::PC_EVENT_REPORT.is_event_transport());
        assert!(Mti::CONSUMER_IDENTIFY.is_event_transport());
        assert!(Mti::PRODUCER_IDENTIFIED_VALID.is_event_transport());
        assert!(!Mti::IDENTIFY_EVENTS_GLOBAL.is_event_transport());
        assert!(!Mti::LEARN_EVENT.is_event_transport());
        assert!(!Mti::DATAGRAM.is_event_transport());
    }
}
