//! Outgoing OpenLCB message → CAN frame translation (§4.5, §6).
//!
//! Mirrors the teacher's `message` module's builder style: given an
//! assembled message, produce the 1..N CAN frames that carry it, applying
//! the FIRST/MIDDLE/FINAL/ONLY nibble and, for addressed messages, the
//! leading `(nibble | dest-alias)` header bytes.

use crate::can::ident::{ControlKind, Identifier};
use crate::mti::Mti;
use openlcb_core::{Alias, CanFrame, NodeId};

/// An outgoing transmission was rejected because the payload would need
/// more frames than the caller's buffer can hold.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TooManyFrames;

const ADDRESSED_BODY_PER_FRAME: usize = 6;

/// Splits `payload` into the CAN frames needed to carry one message,
/// appending them to `out`.
pub fn emit_frames<const MAX: usize>(
    mti: Mti,
    alias: Alias,
    dest: Option<Alias>,
    payload: &[u8],
    out: &mut heapless::Vec<CanFrame, MAX>,
) -> Result<(), TooManyFrames> {
    let id = Identifier::Mti { mti, alias }.to_extended_id();

    if !mti.is_addressed() {
        out.push(CanFrame::new(id, payload).expect("payload already bounded to 8 bytes"))
            .map_err(|_| TooManyFrames)?;
        return Ok(());
    }

    let dest = dest.unwrap_or(Alias::NONE);
    let chunks: heapless::Vec<&[u8], MAX> = if payload.is_empty() {
        let mut v = heapless::Vec::new();
        let _ = v.push(&payload[..0]);
        v
    } else {
        let mut v = heapless::Vec::new();
        let mut rest = payload;
        while !rest.is_empty() {
            let take = rest.len().min(ADDRESSED_BODY_PER_FRAME);
            let (chunk, remainder) = rest.split_at(take);
            v.push(chunk).map_err(|_| TooManyFrames)?;
            rest = remainder;
        }
        v
    };

    let last = chunks.len() - 1;
    for (i, chunk) in chunks.iter().enumerate() {
        let marker: u8 = if chunks.len() == 1 {
            0b0000
        } else if i == 0 {
            0b0001
        } else if i == last {
            0b0011
        } else {
            0b0010
        };
        let mut data = heapless::Vec::<u8, 8>::new();
        let _ = data.push((marker << 4) | ((dest.raw() >> 8) as u8 & 0x0F));
        let _ = data.push((dest.raw() & 0xFF) as u8);
        for &b in *chunk {
            let _ = data.push(b);
        }
        out.push(CanFrame::new(id, &data).expect("frame body bounded to 8 bytes"))
            .map_err(|_| TooManyFrames)?;
    }
    Ok(())
}

/// Builds one of the four Check-Id frames carrying a 12-bit Node ID slice.
pub fn cid_frame(kind: ControlKind, node_id: NodeId, alias: Alias) -> CanFrame {
    let shift = match kind {
        ControlKind::Cid7 => 36,
        ControlKind::Cid6 => 24,
        ControlKind::Cid5 => 12,
        ControlKind::Cid4 => 0,
        _ => 0,
    };
    let fragment = ((node_id.raw() >> shift) & 0x0FFF) as u16;
    let id = Identifier::Control {
        kind,
        node_id_fragment: fragment,
        alias,
    }
    .to_extended_id();
    CanFrame::new(id, &[]).expect("control frames carry no payload")
}

/// Builds the Reserve-Id frame.
pub fn rid_frame(alias: Alias) -> CanFrame {
    let id = Identifier::Control {
        kind: ControlKind::Rid,
        node_id_fragment: 0,
        alias,
    }
    .to_extended_id();
    CanFrame::new(id, &[]).expect("RID carries no payload")
}

/// Builds the Alias Map Definition frame, carrying the full node id
/// MSB-first.
pub fn amd_frame(alias: Alias, node_id: NodeId) -> CanFrame {
    let id = Identifier::Control {
        kind: ControlKind::Amd,
        node_id_fragment: 0,
        alias,
    }
    .to_extended_id();
    CanFrame::new(id, &node_id.to_be_bytes()).expect("AMD payload is exactly 6 bytes")
}

/// Builds the Alias Map Reset frame, sent (ideally) on shutdown.
pub fn amr_frame(alias: Alias, node_id: NodeId) -> CanFrame {
    let id = Identifier::Control {
        kind: ControlKind::Amr,
        node_id_fragment: 0,
        alias,
    }
    .to_extended_id();
    CanFrame::new(id, &node_id.to_be_bytes()).expect("AMR payload is exactly 6 bytes")
}
