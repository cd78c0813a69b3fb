#![no_std]
#![warn(missing_docs)]

//! `openlcb-core` provides the set of essential abstractions that serve as a
//! thin integration layer between the platform independent [`openlcb`]
//! engine and platform specific host crates (in documentation also referred
//! to as _target hosts_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer directly; implementations should be provided by
//! target hosts (a CAN driver, a non-volatile-memory driver, a 100 ms timer).
//!
//! Integrators of this crate into any given target host are responsible for
//! the soundness of trait implementations and for conforming to the safety
//! prerequisites documented on [`HostInterface`].
//!
//! [`openlcb`]: <https://docs.rs/crate/openlcb/>

pub use embedded_can;
pub use fugit;

mod ids;
mod space;

pub use ids::{Alias, EventId, NodeId};
pub use space::AddressSpace;

use core::convert::Infallible;

/// Raw CAN frame exchanged with the host's CAN transceiver driver.
///
/// This is the only frame representation the engine produces or consumes;
/// the host is responsible for turning it into whatever its transceiver
/// driver expects and back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    id: embedded_can::ExtendedId,
    data: [u8; 8],
    len: u8,
}

impl CanFrame {
    /// Builds a frame from a 29-bit identifier and up to 8 data bytes.
    ///
    /// Returns `None` if `data` is longer than 8 bytes.
    pub fn new(id: embedded_can::ExtendedId, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            data: buf,
            len: data.len() as u8,
        })
    }

    /// The 29-bit extended CAN identifier.
    pub fn id(&self) -> embedded_can::ExtendedId {
        self.id
    }

    /// The data bytes actually carried by this frame.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<embedded_can::Id>, data: &[u8]) -> Option<Self> {
        match id.into() {
            embedded_can::Id::Extended(id) => CanFrame::new(id, data),
            embedded_can::Id::Standard(_) => None,
        }
    }

    fn new_remote(_id: impl Into<embedded_can::Id>, _dlc: usize) -> Option<Self> {
        // OpenLCB never uses remote frames.
        None
    }

    fn is_extended(&self) -> bool {
        true
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> embedded_can::Id {
        embedded_can::Id::Extended(self.id)
    }

    fn dlc(&self) -> usize {
        self.len as usize
    }

    fn data(&self) -> &[u8] {
        self.data()
    }
}

/// Marker trait identifying a CAN segment this node stack binds to.
///
/// Analogous to `mcan_core::CanId`: it conveys *which* bus a set of nodes
/// share, not that it can be accessed safely — that is the concern of
/// [`HostInterface`].
pub trait SegmentId {}

/// Host-provided callback surface the engine runs on top of.
///
/// One implementing type per CAN segment. All methods other than
/// [`can_tx_try_send`](Self::can_tx_try_send) are expected to return
/// quickly and never block.
///
/// Exclusive access to the buffer pool and the incoming FIFO (the only
/// mutable state shared between the CAN driver context and the main loop
/// context) is provided by the `critical-section` crate rather than by two
/// bespoke `lock`/`unlock` methods on this trait — see the crate-level docs
/// of `openlcb::dispatch` for why that is a strict refinement of the
/// protocol spec's lock/unlock hooks.
pub trait HostInterface<Id: SegmentId> {
    /// Attempt to place `frame` in the CAN transmit buffer.
    ///
    /// Returns `Err(nb::Error::WouldBlock)` if the transmit buffer is full;
    /// the engine retries on the next call to the main loop.
    fn can_tx_try_send(&self, frame: CanFrame) -> nb::Result<(), Infallible>;

    /// `true` if the CAN transmit buffer currently has room for at least one
    /// more frame.
    fn can_tx_buffer_clear(&self) -> bool;

    /// Ask the driver to stop delivering incoming CAN frames.
    fn can_rx_pause(&self);

    /// Ask the driver to resume delivering incoming CAN frames.
    fn can_rx_resume(&self);

    /// Pause the 100 ms timer tick used for login timing and Broadcast Time.
    fn timer_pause(&self);

    /// Resume the 100 ms timer tick.
    fn timer_resume(&self);

    /// Read up to `buf.len()` bytes from `node`'s persisted configuration
    /// memory at `space`/`address`.
    ///
    /// Returns the number of bytes actually read.
    fn config_mem_read(
        &self,
        node: NodeId,
        space: AddressSpace,
        address: u32,
        buf: &mut [u8],
    ) -> usize;

    /// Write `buf` to `node`'s persisted configuration memory at
    /// `space`/`address`.
    ///
    /// Returns the number of bytes actually written; a short count is
    /// reported to the peer as a temporary transfer error (§4.8, §7).
    fn config_mem_write(
        &self,
        node: NodeId,
        space: AddressSpace,
        address: u32,
        buf: &[u8],
    ) -> usize;

    /// Reboot the host. May not return.
    fn reboot(&self);

    /// Erase `node`'s persisted configuration back to factory defaults.
    fn factory_reset(&self, node: NodeId);

    /// Called once a node's alias has changed (initial login, or a restart
    /// after a detected collision).
    fn alias_changed(&self, _node: NodeId, _new_alias: Alias) {}

    /// Called for every accepted Producer/Consumer Event Report without a
    /// payload.
    fn event_pc_report(&self, _node: NodeId, _event: EventId) {}

    /// Called for every accepted Producer/Consumer Event Report carrying a
    /// payload.
    fn event_pc_report_with_payload(&self, _node: NodeId, _event: EventId, _payload: &[u8]) {}

    /// Called after a successful configuration memory write, so in-memory
    /// state can be re-hydrated from the persisted value.
    fn on_config_mem_write(
        &self,
        _node: NodeId,
        _space: AddressSpace,
        _address: u32,
        _count: usize,
    ) {
    }

    /// Called when a host freezes firmware space (0xEF) ahead of an upgrade.
    fn on_firmware_freeze(&self, _node: NodeId) {}

    /// Called when a host unfreezes firmware space.
    fn on_firmware_unfreeze(&self, _node: NodeId) {}

    /// Called when a firmware upgrade's Update Complete datagram arrives.
    fn on_firmware_update_complete(&self, _node: NodeId) {}
}
