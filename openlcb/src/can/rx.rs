//! Incoming CAN frame reassembly (§4.5).
//!
//! Mirrors the shape of the teacher's `rx_fifo`: a small, bounded table of
//! in-progress reassemblies (one per source alias currently mid-message),
//! draining into completed [`Message`]s drawn from the [`BufferPool`].

use crate::buffer::{BufferPool, PoolError};
use crate::can::ident::{ControlKind, Identifier};
use crate::message::{Destination, Message, PayloadClass};
use crate::mti::Mti;
use crate::util::count_nulls;
use openlcb_core::{Alias, CanFrame};

/// Upper nibble of payload byte 0 for MTI/datagram multi-frame messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FrameMarker {
    Only,
    First,
    Middle,
    Final,
}

impl FrameMarker {
    fn from_nibble(nibble: u8) -> Self {
        match nibble {
            0b0001 => FrameMarker::First,
            0b0010 => FrameMarker::Middle,
            0b0011 => FrameMarker::Final,
            _ => FrameMarker::Only,
        }
    }
}

/// A control frame observed on the bus, surfaced so the login/alias-cache
/// layer can react (§4.2, §8 S3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Cid {
        kind: ControlKind,
        node_id_fragment: u16,
        alias: Alias,
    },
    Rid {
        alias: Alias,
    },
    Amd {
        alias: Alias,
        node_id: openlcb_core::NodeId,
    },
    Amr {
        alias: Alias,
        node_id: openlcb_core::NodeId,
    },
}

/// What processing one incoming CAN frame produced.
#[derive(Debug)]
pub enum RxOutcome {
    /// A CAN control frame; no OpenLCB message is involved.
    Control(ControlEvent),
    /// A frame was consumed into an in-progress reassembly; nothing is
    /// ready yet.
    Pending,
    /// A message finished reassembling.
    Ready(Message),
    /// The frame could not be processed.
    Error(RxError),
}

/// Reasons an incoming frame could not be turned into a message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RxError {
    /// Every slot in the payload's size class was in use.
    PoolExhausted,
    /// The assembled payload would exceed its class's fixed capacity
    /// (§4.5, reported to the sender as `ERROR_PERMANENT_BUFFER_OVERFLOW`).
    BufferOverflow,
    /// A continuation frame (MIDDLE/FINAL) arrived for a source alias with
    /// no matching in-progress reassembly.
    UnexpectedContinuation,
    /// The in-progress reassembly table has no room for a new FIRST frame.
    TableFull,
}

impl From<PoolError> for RxError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Exhausted => RxError::PoolExhausted,
            PoolError::PayloadTooLarge => RxError::BufferOverflow,
            PoolError::Stale => RxError::UnexpectedContinuation,
        }
    }
}

struct InProgress {
    alias: Alias,
    mti: Mti,
    handle: crate::buffer::PayloadHandle,
    dest: Option<Destination>,
}

/// Tracks reassembly of multi-frame messages, keyed by source alias.
pub struct RxAssembler<const IN_FLIGHT: usize> {
    in_progress: heapless::Vec<InProgress, IN_FLIGHT>,
}

impl<const IN_FLIGHT: usize> RxAssembler<IN_FLIGHT> {
    /// Builds an assembler with no in-progress reassemblies.
    pub const fn new() -> Self {
        Self {
            in_progress: heapless::Vec::new(),
        }
    }

    fn find(&mut self, alias: Alias) -> Option<usize> {
        self.in_progress.iter().position(|p| p.alias == alias)
    }

    /// Processes one incoming CAN frame, draining it into the appropriate
    /// in-progress reassembly or completing it outright.
    pub fn process_frame<const B: usize, const D: usize, const S: usize, const ST: usize>(
        &mut self,
        pool: &mut BufferPool<B, D, S, ST>,
        frame: &CanFrame,
    ) -> RxOutcome {
        let Some(id) = Identifier::from_extended_id(frame.id()) else {
            return RxOutcome::Pending;
        };
        let Identifier::Mti { mti, alias } = id else {
            let Identifier::Control {
                kind,
                node_id_fragment,
                alias,
            } = id
            else {
                unreachable!()
            };
            return RxOutcome::Control(match kind {
                ControlKind::Rid => ControlEvent::Rid { alias },
                ControlKind::Amd => {
                    let node_id = frame_node_id(frame.data());
                    ControlEvent::Amd { alias, node_id }
                }
                ControlKind::Amr => {
                    let node_id = frame_node_id(frame.data());
                    ControlEvent::Amr { alias, node_id }
                }
                _ => ControlEvent::Cid {
                    kind,
                    node_id_fragment,
                    alias,
                },
            });
        };

        let data = frame.data();
        let is_addressed = mti.is_addressed();
        let (marker, body) = if is_addressed && !data.is_empty() {
            let nibble = data[0] >> 4;
            (FrameMarker::from_nibble(nibble), &data[2.min(data.len())..])
        } else if !is_addressed && !data.is_empty() && mti.is_datagram() {
            let nibble = data[0] >> 4;
            (FrameMarker::from_nibble(nibble), &data[1..])
        } else {
            (FrameMarker::Only, data)
        };

        let dest = if is_addressed && data.len() >= 2 {
            let dest_alias = Alias::new((((data[0] & 0x0F) as u16) << 8) | data[1] as u16);
            Some(Destination {
                alias: dest_alias,
                node_id: None,
            })
        } else {
            None
        };

        match marker {
            FrameMarker::Only => {
                let class = class_for(mti, body.len());
                match pool.allocate(body) {
                    Ok(handle) => RxOutcome::Ready(Message::new(mti, alias, None, dest, handle)),
                    Err(_) if class == PayloadClass::Stream => RxOutcome::Error(RxError::PoolExhausted),
                    Err(e) => RxOutcome::Error(e.into()),
                }
            }
            FrameMarker::First => {
                if self.in_progress.len() == IN_FLIGHT && self.find(alias).is_none() {
                    return RxOutcome::Error(RxError::TableFull);
                }
                let class = class_for(mti, body.len());
                let handle = match pool.allocate_empty(class) {
                    Ok(h) => h,
                    Err(e) => return RxOutcome::Error(e.into()),
                };
                if let Err(e) = pool.append(handle, body) {
                    return RxOutcome::Error(e.into());
                }
                if self
                    .in_progress
                    .push(InProgress {
                        alias,
                        mti,
                        handle,
                        dest,
                    })
                    .is_err()
                {
                    return RxOutcome::Error(RxError::TableFull);
                }
                RxOutcome::Pending
            }
            FrameMarker::Middle | FrameMarker::Final => {
                let Some(index) = self.find(alias) else {
                    return RxOutcome::Error(RxError::UnexpectedContinuation);
                };
                let handle = self.in_progress[index].handle;
                if let Err(e) = pool.append(handle, body) {
                    self.in_progress.remove(index);
                    pool.release(handle);
                    return RxOutcome::Error(e.into());
                }
                if matches!(marker, FrameMarker::Final) || snip_complete(mti, pool, handle) {
                    let entry = self.in_progress.remove(index);
                    RxOutcome::Ready(Message::new(entry.mti, entry.alias, None, entry.dest, entry.handle))
                } else {
                    RxOutcome::Pending
                }
            }
        }
    }
}

impl<const IN_FLIGHT: usize> Default for RxAssembler<IN_FLIGHT> {
    fn default() -> Self {
        Self::new()
    }
}

fn class_for(mti: Mti, len: usize) -> PayloadClass {
    if mti.is_datagram() {
        PayloadClass::Datagram
    } else if mti == Mti::SIMPLE_NODE_IDENT_INFO_REPLY {
        PayloadClass::Snip
    } else {
        PayloadClass::smallest_fit(len).unwrap_or(PayloadClass::Snip)
    }
}

fn snip_complete<const B: usize, const D: usize, const S: usize, const ST: usize>(
    mti: Mti,
    pool: &BufferPool<B, D, S, ST>,
    handle: crate::buffer::PayloadHandle,
) -> bool {
    if mti != Mti::SIMPLE_NODE_IDENT_INFO_REPLY {
        return false;
    }
    match pool.read(handle) {
        Ok(payload) => count_nulls(payload) >= 6,
        Err(_) => false,
    }
}

fn frame_node_id(data: &[u8]) -> openlcb_core::NodeId {
    let mut bytes = [0u8; 6];
    let n = data.len().min(6);
    bytes[..n].copy_from_slice(&data[..n]);
    openlcb_core::NodeId::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use embedded_can::Frame as _;

    type TestPool = BufferPool<4, 4, 2, 1>;

    fn mti_frame(mti: Mti, alias: Alias, data: &[u8]) -> CanFrame {
        let id = Identifier::Mti { mti, alias }.to_extended_id();
        CanFrame::new(id, data).unwrap()
    }

    #[test]
    fn single_frame_basic_message_completes_immediately() {
        let mut pool = TestPool::new();
        let mut rx: RxAssembler<2> = RxAssembler::new();
        let frame = mti_frame(Mti::PC_EVENT_REPORT, Alias::new(0x123), &[1, 2, 3, 4, 5, 6, 7, 8]);
        match rx.process_frame(&mut pool, &frame) {
            RxOutcome::Ready(msg) => {
                assert_eq!(msg.mti(), Mti::PC_EVENT_REPORT);
                assert_eq!(pool.read(msg.payload_handle()).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn datagram_first_middle_final_reassembles() {
        let mut pool = TestPool::new();
        let mut rx: RxAssembler<2> = RxAssembler::new();
        let alias = Alias::new(0x042);

        let first = mti_frame(Mti::DATAGRAM, alias, &[0x10, 1, 2, 3, 4, 5, 6]);
        assert!(matches!(rx.process_frame(&mut pool, &first), RxOutcome::Pending));

        let middle = mti_frame(Mti::DATAGRAM, alias, &[0x20, 7, 8, 9]);
        assert!(matches!(rx.process_frame(&mut pool, &middle), RxOutcome::Pending));

        let last = mti_frame(Mti::DATAGRAM, alias, &[0x30, 10]);
        match rx.process_frame(&mut pool, &last) {
            RxOutcome::Ready(msg) => {
                assert_eq!(
                    pool.read(msg.payload_handle()).unwrap(),
                    &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn continuation_without_first_is_an_error() {
        let mut pool = TestPool::new();
        let mut rx: RxAssembler<2> = RxAssembler::new();
        let frame = mti_frame(Mti::DATAGRAM, Alias::new(1), &[0x30, 1]);
        assert!(matches!(
            rx.process_frame(&mut pool, &frame),
            RxOutcome::Error(RxError::UnexpectedContinuation)
        ));
    }

    #[test]
    fn control_frame_is_reported_as_control_event() {
        let mut pool = TestPool::new();
        let mut rx: RxAssembler<2> = RxAssembler::new();
        let id = Identifier::Control {
            kind: ControlKind::Rid,
            node_id_fragment: 0,
            alias: Alias::new(0x5),
        }
        .to_extended_id();
        let frame = CanFrame::new(id, &[]).unwrap();
        match rx.process_frame(&mut pool, &frame) {
            RxOutcome::Control(ControlEvent::Rid { alias }) => assert_eq!(alias, Alias::new(0x5)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
