//! 29-bit CAN identifier encoding (§4.5, §6).
//!
//! The wire format packs `RESERVED_TOP_BIT | <frame code> | (<id fragment> |
//! alias)`. To carry a full 12-bit Node ID slice in every Check-ID frame
//! without truncation, the frame code here is 4 bits wide rather than the
//! 3 bits the overview sketches at a high level — `1 + 4 + 12 + 12 = 29`
//! bits exactly, and Message/Datagram/Stream frames are told apart by MTI
//! and by the payload's multi-frame nibble rather than by a dedicated
//! identifier bit, since the MTI already carries that distinction
//! (`Mti::is_datagram`).

use crate::mti::Mti;
use embedded_can::ExtendedId;
use openlcb_core::Alias;

/// Which of the four Check-ID fragments, or which other CAN control frame,
/// an identifier's frame code names.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlKind {
    /// Node ID bits 47:36.
    Cid7,
    /// Node ID bits 35:24.
    Cid6,
    /// Node ID bits 23:12.
    Cid5,
    /// Node ID bits 11:0.
    Cid4,
    /// Reserve-Id.
    Rid,
    /// Alias Map Definition.
    Amd,
    /// Alias Map Reset.
    Amr,
}

impl ControlKind {
    const fn code(self) -> u32 {
        match self {
            ControlKind::Cid7 => 0x1,
            ControlKind::Cid6 => 0x2,
            ControlKind::Cid5 => 0x3,
            ControlKind::Cid4 => 0x4,
            ControlKind::Rid => 0x5,
            ControlKind::Amd => 0x6,
            ControlKind::Amr => 0x7,
        }
    }

    const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x1 => ControlKind::Cid7,
            0x2 => ControlKind::Cid6,
            0x3 => ControlKind::Cid5,
            0x4 => ControlKind::Cid4,
            0x5 => ControlKind::Rid,
            0x6 => ControlKind::Amd,
            0x7 => ControlKind::Amr,
            _ => return None,
        })
    }
}

const MTI_MESSAGE_CODE: u32 = 0x8;

/// A decoded CAN identifier: either a control frame, or an MTI-bearing
/// frame (an ordinary message, a datagram fragment, or a stream frame —
/// the caller tells those apart via [`Mti::is_datagram`] and the payload's
/// multi-frame nibble).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    /// A Check-Id / Reserve-Id / AMD / AMR frame.
    Control {
        kind: ControlKind,
        /// The 12-bit Node ID slice this frame carries; zero outside CID frames.
        node_id_fragment: u16,
        alias: Alias,
    },
    /// An MTI-bearing frame.
    Mti { mti: Mti, alias: Alias },
}

impl Identifier {
    /// Packs this identifier into a 29-bit extended CAN id.
    pub fn to_extended_id(self) -> ExtendedId {
        let raw = match self {
            Identifier::Control {
                kind,
                node_id_fragment,
                alias,
            } => {
                (kind.code() << 24) | ((node_id_fragment as u32 & 0x0FFF) << 12) | alias.raw() as u32
            }
            Identifier::Mti { mti, alias } => {
                (MTI_MESSAGE_CODE << 24) | ((mti.raw() as u32 & 0x0FFF) << 12) | alias.raw() as u32
            }
        };
        // `raw` never sets bit 28: frame code is 4 bits at 27:24.
        ExtendedId::new(raw).expect("29-bit identifier fits by construction")
    }

    /// Decodes a 29-bit extended CAN id, if it carries a frame code this
    /// engine recognizes.
    pub fn from_extended_id(id: ExtendedId) -> Option<Self> {
        let raw = id.as_raw();
        let code = (raw >> 24) & 0xF;
        let fragment_or_mti = ((raw >> 12) & 0x0FFF) as u16;
        let alias = Alias::new((raw & 0x0FFF) as u16);
        if code == MTI_MESSAGE_CODE {
            return Some(Identifier::Mti {
                mti: Mti::new(fragment_or_mti),
                alias,
            });
        }
        let kind = ControlKind::from_code(code)?;
        Some(Identifier::Control {
            kind,
            node_id_fragment: fragment_or_mti,
            alias,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openlcb_core::NodeId;

    #[test]
    fn cid_round_trips_with_node_id_fragment() {
        let node_id = NodeId::new(0x0102_0304_0506);
        let fragment = ((node_id.raw() >> 36) & 0x0FFF) as u16;
        let ident = Identifier::Control {
            kind: ControlKind::Cid7,
            node_id_fragment: fragment,
            alias: Alias::new(0x0ABC),
        };
        let decoded = Identifier::from_extended_id(ident.to_extended_id()).unwrap();
        assert_eq!(decoded, ident);
    }

    #[test]
    fn mti_message_round_trips() {
        let ident = Identifier::Mti {
            mti: Mti::PC_EVENT_REPORT,
            alias: Alias::new(0x0111),
        };
        let decoded = Identifier::from_extended_id(ident.to_extended_id()).unwrap();
        assert_eq!(decoded, ident);
    }

    #[test]
    fn unrecognized_frame_code_decodes_to_none() {
        let raw = 0xF << 24; // code 0xF is never assigned
        let id = ExtendedId::new(raw).unwrap();
        assert!(Identifier::from_extended_id(id).is_none());
    }
}
