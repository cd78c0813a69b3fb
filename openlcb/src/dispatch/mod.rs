//! The main OpenLCB message dispatcher (§4.6).
//!
//! [`MainStateMachine`] owns only what has to live across main-loop
//! iterations: the frame reassembler, the outgoing-frame outbox, the
//! message currently being walked against every hosted node, the node-walk
//! cursor's remaining count, and the Broadcast Time clocks this process
//! happens to run. Everything else — the buffer pool, the node table, the
//! incoming FIFO — is passed in by the caller on every call, the same
//! method-level-const-generic shape [`crate::can::rx::RxAssembler`] and
//! [`crate::buffer::BufferPool`] already use, so this struct never needs to
//! be told up front how big any of those are.
//!
//! [`MainStateMachine::run_once`] follows the priority order the dispatch
//! cycle is specified with: (a) drain the outbox through
//! [`openlcb_core::HostInterface::can_tx_try_send`] first, leaving a frame
//! in place for the next call if the driver's transmit buffer is full; only
//! once the outbox is empty does it (b) resume walking the message in
//! flight, or (c)/(d) pop the next incoming message and start walking it
//! against every hosted node. Handlers never call the host's transmit hook
//! themselves — they enqueue via [`MainStateMachine::enqueue`], and the next
//! [`run_once`](Self::run_once) call is what actually sends.
//!
//! State genuinely shared between the CAN driver's interrupt/callback
//! context and this main-loop context — the buffer pool, the incoming
//! FIFO, a node's foreign-alias cache — is protected by whatever
//! `critical-section` implementation the host crate selects, not by a
//! bespoke pair of `lock`/`unlock` callbacks on [`openlcb_core::HostInterface`].
//! A `critical-section` section is strictly more general than a hand-rolled
//! lock/unlock pair (it composes under nesting and already has
//! implementations for every target this crate could run on), so adopting
//! it here is a refinement of that hook, not a deviation from it; callers
//! are expected to wrap [`MainStateMachine::on_frame`] and
//! [`MainStateMachine::run_once`]'s shared arguments in a `critical_section::with`
//! block when the CAN driver can preempt the main loop.
//!
//! [`NodeTable::get_first`]/`get_next` enumeration cursors are keyed (§4.3):
//! this dispatcher uses [`CURSOR_KEY_DISPATCH`] to walk the current message
//! against every hosted node and [`CURSOR_KEY_LOGIN`] to round-robin the
//! next not-yet-logged-in node's login step, so the two enumerations keep
//! independent positions even though [`MainStateMachine::do_login_step`]
//! only ever runs when no message is in flight and the outbox is empty.

pub mod handlers;

use core::convert::Infallible;
use core::marker::PhantomData;

use openlcb_core::{Alias, CanFrame, EventId, HostInterface, NodeId, SegmentId};

use crate::buffer::{BufferFifo, BufferPool};
use crate::can::{self, ControlEvent, RxAssembler, RxOutcome};
use crate::configmem;
use crate::datagram;
use crate::event;
use crate::message::Message;
use crate::mti::Mti;
use crate::node::{LoginAction, NodeEntry, NodeTable};
use crate::time::{self, ClockSlot, QuerySequencer};

/// A clock could not be added because this state machine's fixed clock
/// table is already full.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockTableFull;

/// Enumeration key the dispatcher uses to walk the message currently in
/// flight against every hosted node (§4.3, §4.6).
const CURSOR_KEY_DISPATCH: u8 = 0;

/// Enumeration key the dispatcher uses to round-robin the login step
/// across not-yet-running nodes (§4.3, §4.4).
const CURSOR_KEY_LOGIN: u8 = 1;

/// The maximum number of CAN frames a single outgoing message is ever
/// split into (bounds the scratch buffer [`MainStateMachine::enqueue`]
/// fragments into before handing frames to the outbox). 72 datagram bytes
/// at 6 bytes/frame is 12 frames; 16 leaves headroom.
const MAX_FRAGMENTS_PER_MESSAGE: usize = 16;

/// SNIP's manufacturer-block format version this node reports (§4.10).
const SNIP_MANUFACTURER_VERSION: u8 = 4;

/// SNIP's user-block format version this node reports (§4.10).
const SNIP_USER_VERSION: u8 = 2;

/// How many bytes of a node's ACDI manufacturer/user block this engine will
/// read into one Simple Node Ident Info reply. Both blocks are a handful of
/// short null-terminated strings; this leaves headroom under
/// [`MAX_FRAGMENTS_PER_MESSAGE`]'s 96-byte ceiling with both version bytes
/// included.
const SNIP_BLOCK_MAX: usize = 32;

/// Worst-case Simple Node Ident Info reply size: both version bytes plus
/// both blocks at [`SNIP_BLOCK_MAX`].
const SNIP_PAYLOAD_MAX: usize = 2 + 2 * SNIP_BLOCK_MAX;

/// Computes whether an accepted Configuration Memory datagram will produce
/// a further Datagram reply, and, if so, a rough estimate (in seconds) of
/// how long that reply may take — scaled by how much data the host's
/// backing store has to move. Commands with no further reply (a reboot, a
/// factory reset, or an upgrade-complete notice) are not reply-pending at
/// all.
fn config_memory_reply_pending(command: &configmem::Command) -> (bool, u32) {
    match *command {
        configmem::Command::Read { count, .. } => (true, 1 + u32::from(count) / 16),
        configmem::Command::Write { data_len, .. } => (true, 1 + data_len as u32 / 16),
        configmem::Command::GetUniqueId
        | configmem::Command::Options
        | configmem::Command::GetAddressSpaceInfo { .. }
        | configmem::Command::ReserveLock { .. }
        | configmem::Command::Freeze { .. }
        | configmem::Command::Unfreeze { .. } => (true, 1),
        configmem::Command::UpdateComplete | configmem::Command::ResetReboot | configmem::Command::FactoryReset => {
            (false, 0)
        }
    }
}

/// `true` if this node actually implements `space` (§4.8). Traction
/// function spaces are out of scope for this node; every other defined
/// space is backed by [`openlcb_core::HostInterface::config_mem_read`].
fn config_memory_space_present(space: openlcb_core::AddressSpace) -> bool {
    !matches!(
        space,
        openlcb_core::AddressSpace::TractionConfig | openlcb_core::AddressSpace::TractionDefinition
    )
}

/// Drives frame reassembly, login, message dispatch, and Broadcast Time
/// for every node hosted on one CAN segment.
///
/// `IN_FLIGHT` sizes the incoming multi-frame reassembly table (forwarded
/// to the internal [`RxAssembler`]); `CLOCKS` bounds how many Broadcast
/// Time clocks this process can run at once; `OUTBOX` bounds how many
/// outgoing CAN frames may be queued awaiting the host's transmit buffer.
pub struct MainStateMachine<Id, H, const IN_FLIGHT: usize, const CLOCKS: usize, const OUTBOX: usize>
where
    Id: SegmentId,
    H: HostInterface<Id>,
{
    host: H,
    rx: RxAssembler<IN_FLIGHT>,
    outbox: BufferFifo<CanFrame, OUTBOX>,
    clocks: heapless::Vec<ClockSlot, CLOCKS>,
    sequencers: heapless::Vec<QuerySequencer, CLOCKS>,
    current: Option<Message>,
    nodes_left: usize,
    fresh: bool,
    _id: PhantomData<Id>,
}

impl<Id, H, const IN_FLIGHT: usize, const CLOCKS: usize, const OUTBOX: usize>
    MainStateMachine<Id, H, IN_FLIGHT, CLOCKS, OUTBOX>
where
    Id: SegmentId,
    H: HostInterface<Id>,
{
    /// Builds a state machine around the given host callback surface, with
    /// no clocks configured and no message in flight.
    pub const fn new(host: H) -> Self {
        Self {
            host,
            rx: RxAssembler::new(),
            outbox: BufferFifo::new(),
            clocks: heapless::Vec::new(),
            sequencers: heapless::Vec::new(),
            current: None,
            nodes_left: 0,
            fresh: false,
            _id: PhantomData,
        }
    }

    /// The host callback surface this state machine drives.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the host callback surface.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Registers a Broadcast Time clock this process runs.
    pub fn add_clock(&mut self, slot: ClockSlot) -> Result<(), ClockTableFull> {
        self.clocks.push(slot).map_err(|_| ClockTableFull)?;
        self.sequencers
            .push(QuerySequencer::new())
            .map_err(|_| ClockTableFull)?;
        Ok(())
    }

    /// Splits one outgoing message into CAN frames and queues them for
    /// transmission by a later [`run_once`](Self::run_once) call.
    fn enqueue(&mut self, mti: Mti, alias: Alias, dest: Option<Alias>, payload: &[u8]) {
        let mut frames: heapless::Vec<CanFrame, MAX_FRAGMENTS_PER_MESSAGE> = heapless::Vec::new();
        if can::emit_frames(mti, alias, dest, payload, &mut frames).is_err() {
            log::warn!("dropping outgoing message {mti:?}, too many fragments");
            return;
        }
        for frame in frames {
            if !self.outbox.push(frame) {
                log::warn!("outgoing queue full, dropping a frame of {mti:?}");
            }
        }
    }

    /// Feeds one incoming CAN frame to the reassembler. Completed messages
    /// are pushed onto `incoming` for [`run_once`](Self::run_once) to walk
    /// against every hosted node; CAN control frames update alias state
    /// directly.
    pub fn on_frame<
        const B: usize,
        const D: usize,
        const S: usize,
        const ST: usize,
        const N: usize,
        const AC: usize,
        const IN: usize,
    >(
        &mut self,
        pool: &mut BufferPool<B, D, S, ST>,
        nodes: &mut NodeTable<N, AC>,
        incoming: &mut BufferFifo<Message, IN>,
        frame: &CanFrame,
    ) {
        match self.rx.process_frame(pool, frame) {
            RxOutcome::Ready(message) => {
                if !incoming.push(message) {
                    pool.release(message.payload_handle());
                }
            }
            RxOutcome::Control(event) => self.handle_control_event(nodes, event),
            RxOutcome::Pending => {}
            RxOutcome::Error(err) => {
                log::warn!("dropping incoming frame, could not reassemble: {err:?}");
            }
        }
    }

    fn handle_control_event<const N: usize, const AC: usize>(
        &mut self,
        nodes: &mut NodeTable<N, AC>,
        event: ControlEvent,
    ) {
        match event {
            ControlEvent::Cid { alias, .. } | ControlEvent::Rid { alias } => {
                for node in nodes.iter_mut() {
                    if !node.is_running() && node.alias() == alias {
                        log::debug!("alias {alias:?} contested before RID, restarting login");
                        node.login_mut().restart_on_conflict();
                    }
                }
            }
            ControlEvent::Amd { alias, node_id } => {
                for node in nodes.iter_mut() {
                    if node.alias() == alias {
                        log::warn!("our alias {alias:?} claimed by {node_id}, restarting login");
                        node.login_mut().restart_on_conflict();
                    } else {
                        node.foreign_aliases_mut().set_mapping(alias, Some(node_id));
                    }
                }
            }
            ControlEvent::Amr { alias, .. } => {
                for node in nodes.iter_mut() {
                    node.foreign_aliases_mut().clear_mapping(alias);
                }
            }
        }
    }

    /// Runs one step of the main loop, in the specified priority order:
    /// drain the outbox if it holds anything; else resume walking the
    /// message in flight, or start walking the next one; else advance one
    /// hosted node's login sequence. Returns `true` if it did anything, so
    /// a caller looping "while work remains" knows when to stop.
    pub fn run_once<
        const B: usize,
        const D: usize,
        const S: usize,
        const ST: usize,
        const N: usize,
        const AC: usize,
        const IN: usize,
    >(
        &mut self,
        pool: &mut BufferPool<B, D, S, ST>,
        nodes: &mut NodeTable<N, AC>,
        incoming: &mut BufferFifo<Message, IN>,
    ) -> bool {
        if let Some(frame) = self.outbox.pop() {
            match self.host.can_tx_try_send(frame) {
                Ok(()) => {}
                Err(nb::Error::WouldBlock) => self.outbox.requeue_front(frame),
                Err(nb::Error::Other(never)) => match never {},
            }
            return true;
        }

        if self.current.is_none() {
            match incoming.pop() {
                Some(message) => {
                    self.nodes_left = nodes.len();
                    self.fresh = true;
                    self.current = Some(message);
                }
                None => return self.do_login_step(nodes),
            }
        }

        let message = match self.current {
            Some(m) => m,
            None => return false,
        };

        let node = if self.fresh {
            self.fresh = false;
            nodes.get_first(CURSOR_KEY_DISPATCH)
        } else {
            nodes.get_next(CURSOR_KEY_DISPATCH)
        };

        if let Some(node) = node {
            if does_node_process_msg(node, &message) {
                self.dispatch(node, &message, pool);
            }
        }

        self.nodes_left = self.nodes_left.saturating_sub(1);
        if self.nodes_left == 0 {
            pool.release(message.payload_handle());
            self.current = None;
        }
        true
    }

    fn dispatch<const AC: usize, const B: usize, const D: usize, const S: usize, const ST: usize>(
        &mut self,
        node: &mut NodeEntry<AC>,
        message: &Message,
        pool: &mut BufferPool<B, D, S, ST>,
    ) {
        let mti = message.mti();
        let alias = node.alias();
        let sender = message.source_alias();

        match mti {
            Mti::VERIFY_NODE_ID_ADDRESSED | Mti::VERIFY_NODE_ID_GLOBAL => {
                if mti == Mti::VERIFY_NODE_ID_GLOBAL {
                    if let Ok(payload) = pool.read(message.payload_handle()) {
                        if payload.len() >= 6 && crate::util::extract_node_id(payload) != node.node_id() {
                            return;
                        }
                    }
                }
                self.enqueue(Mti::VERIFIED_NODE_ID, alias, Some(sender), &node.node_id().to_be_bytes());
            }
            Mti::PROTOCOL_SUPPORT_INQUIRY => {
                let payload = handlers::protocol_support_payload(true, true, true, true);
                self.enqueue(Mti::PROTOCOL_SUPPORT_REPLY, alias, Some(sender), &payload);
            }
            Mti::IDENTIFY_EVENTS_ADDRESSED | Mti::IDENTIFY_EVENTS_GLOBAL => {
                self.identify_events(node);
            }
            Mti::SIMPLE_NODE_IDENT_INFO_REQUEST => {
                self.simple_node_ident_info(node, sender);
            }
            _ if mti.is_datagram() => self.dispatch_datagram(node, message, pool),
            _ if mti.is_event_transport() => self.dispatch_event(node, message, pool),
            _ => {
                if mti.is_addressed() {
                    let payload = handlers::rejected_interaction_payload(mti);
                    self.enqueue(Mti::OPTIONAL_INTERACTION_REJECTED, alias, Some(sender), &payload);
                }
            }
        }
    }

    fn dispatch_datagram<const AC: usize, const B: usize, const D: usize, const S: usize, const ST: usize>(
        &mut self,
        node: &mut NodeEntry<AC>,
        message: &Message,
        pool: &mut BufferPool<B, D, S, ST>,
    ) {
        if message.mti() != Mti::DATAGRAM {
            // Datagram Received OK / Rejected addressed back to us: nothing
            // further to do, the transfer this acknowledges is complete.
            return;
        }
        let alias = node.alias();
        let sender = message.source_alias();
        let Ok(body) = pool.read(message.payload_handle()) else {
            return;
        };
        match datagram::classify_command(body) {
            Ok(datagram::CommandClass::ConfigMemory) => {
                let (reply_pending, estimated_seconds) = match configmem::parse(body) {
                    Ok(command) => config_memory_reply_pending(&command),
                    Err(_) => (false, 0),
                };
                let exponent = datagram::encode_reply_pending_exponent(estimated_seconds);
                let ok_payload = datagram::ok_reply_payload(reply_pending, exponent);
                self.enqueue(Mti::DATAGRAM_OK_REPLY, alias, Some(sender), &ok_payload);
                self.dispatch_config_memory(node, body, sender);
            }
            Err(error) => {
                let rejected = datagram::rejected_reply_payload(error);
                self.enqueue(Mti::DATAGRAM_REJECTED_REPLY, alias, Some(sender), &rejected);
            }
        }
    }

    fn dispatch_config_memory<const AC: usize>(&mut self, node: &mut NodeEntry<AC>, body: &[u8], sender: Alias) {
        let alias = node.alias();
        let node_id = node.node_id();

        // A subcommand this node does not recognize was already accepted at
        // the datagram layer (the OK reply went out above); there is no
        // further reply to send for it here.
        let Ok(command) = configmem::parse(body) else {
            return;
        };

        match command {
            configmem::Command::Read { space, address, count, shorthand } => {
                let mut buf = [0u8; 64];
                let want = (count as usize).min(buf.len());
                let got = self.host.config_mem_read(node_id, space, address, &mut buf[..want]);
                let reply = if got < want {
                    configmem::build_read_fail(
                        space,
                        address,
                        shorthand,
                        datagram::DatagramError::TemporaryTransferError,
                    )
                } else {
                    configmem::build_read_ok(space, address, shorthand, &buf[..got])
                };
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
            configmem::Command::Write { space, address, data_offset, data_len, shorthand } => {
                let data = &body[data_offset..data_offset + data_len];
                let written = self.host.config_mem_write(node_id, space, address, data);
                let reply = if written < data_len {
                    configmem::build_write_fail(
                        space,
                        address,
                        shorthand,
                        datagram::DatagramError::TemporaryTransferError,
                    )
                } else {
                    self.host.on_config_mem_write(node_id, space, address, written);
                    configmem::build_write_ok(space, address, shorthand)
                };
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
            configmem::Command::GetUniqueId => {
                let reply = configmem::build_unique_id_reply(node_id.to_be_bytes());
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
            configmem::Command::Freeze { space } => {
                self.host.on_firmware_freeze(node_id);
                let reply = configmem::build_write_ok(space, 0, false);
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
            configmem::Command::Unfreeze { space } => {
                self.host.on_firmware_unfreeze(node_id);
                let reply = configmem::build_write_ok(space, 0, false);
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
            configmem::Command::UpdateComplete => {
                self.host.on_firmware_update_complete(node_id);
            }
            configmem::Command::ResetReboot => {
                self.host.reboot();
            }
            configmem::Command::FactoryReset => {
                self.host.factory_reset(node_id);
            }
            configmem::Command::Options => {
                let reply = configmem::build_options_reply(true, openlcb_core::AddressSpace::Firmware);
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
            configmem::Command::GetAddressSpaceInfo { space } => {
                if config_memory_space_present(space) {
                    let reply = configmem::build_address_space_info_reply(space, u32::MAX, 0);
                    self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
                } else {
                    let reply = configmem::build_address_space_info_absent(space);
                    self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
                }
            }
            configmem::Command::ReserveLock { space: _ } => {
                let reply = configmem::build_reserve_lock_reply(node_id.to_be_bytes());
                self.enqueue(Mti::DATAGRAM, alias, Some(sender), &reply);
            }
        }
    }

    fn dispatch_event<const AC: usize, const B: usize, const D: usize, const S: usize, const ST: usize>(
        &mut self,
        node: &mut NodeEntry<AC>,
        message: &Message,
        pool: &mut BufferPool<B, D, S, ST>,
    ) {
        let alias = node.alias();
        let node_id = node.node_id();
        let mti = message.mti();

        let Ok(body) = pool.read(message.payload_handle()) else {
            return;
        };
        if body.len() < 8 {
            return;
        }
        let event_id = crate::util::extract_event_id(body);

        match mti {
            Mti::PC_EVENT_REPORT => {
                self.host.event_pc_report(node_id, event_id);
                self.maybe_start_query(event_id);
            }
            Mti::PC_EVENT_REPORT_WITH_PAYLOAD => {
                self.host.event_pc_report_with_payload(node_id, event_id, &body[8..]);
            }
            Mti::CONSUMER_IDENTIFY => {
                for index in 0..node.params().consumer_count() {
                    if event::consumer_event_id(node_id, index) == event_id {
                        let state = node.params().consumer_state(index);
                        let payload = event::event_payload(event_id);
                        self.enqueue(state.consumer_identified_mti(), alias, None, &payload);
                        break;
                    }
                }
            }
            Mti::PRODUCER_IDENTIFY => {
                for index in 0..node.params().producer_count() {
                    if event::producer_event_id(node_id, index) == event_id {
                        let state = node.params().producer_state(index);
                        let payload = event::event_payload(event_id);
                        self.enqueue(state.producer_identified_mti(), alias, None, &payload);
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    /// If `event_id` is a clock's Query suffix, kicks off that clock's
    /// 6-step reply sequence.
    fn maybe_start_query(&mut self, event_id: EventId) {
        if event_id.suffix() != time::SUFFIX_QUERY {
            return;
        }
        let clock_id = NodeId::new(event_id.raw() >> 16);
        for (slot, seq) in self.clocks.iter().zip(self.sequencers.iter_mut()) {
            if slot.clock_id == clock_id {
                seq.start();
            }
        }
    }

    fn do_login_step<const N: usize, const AC: usize>(&mut self, nodes: &mut NodeTable<N, AC>) -> bool {
        let Some(node) = nodes.get_next(CURSOR_KEY_LOGIN) else {
            return false;
        };
        if node.is_running() {
            return false;
        }
        let node_id = node.node_id();
        let producer_count = node.params().producer_count();
        let consumer_count = node.params().consumer_count();
        let action = node.login_mut().advance(node_id, producer_count, consumer_count);
        self.emit_login_action(node, action);
        true
    }

    fn emit_login_action<const AC: usize>(&mut self, node: &mut NodeEntry<AC>, action: LoginAction) {
        match action {
            LoginAction::SendCid { frame, alias, node_id } => {
                let kind = match frame {
                    7 => can::ControlKind::Cid7,
                    6 => can::ControlKind::Cid6,
                    5 => can::ControlKind::Cid5,
                    _ => can::ControlKind::Cid4,
                };
                if !self.outbox.push(can::cid_frame(kind, node_id, alias)) {
                    log::warn!("outgoing queue full, dropping a login CID frame");
                }
            }
            LoginAction::Waiting => {}
            LoginAction::SendRid { alias } => {
                if !self.outbox.push(can::rid_frame(alias)) {
                    log::warn!("outgoing queue full, dropping the RID frame");
                }
            }
            LoginAction::SendAmd { alias, node_id } => {
                if !self.outbox.push(can::amd_frame(alias, node_id)) {
                    log::warn!("outgoing queue full, dropping the AMD frame");
                }
                self.host.alias_changed(node_id, alias);
            }
            LoginAction::SendInitComplete { alias, node_id } => {
                self.enqueue(Mti::INITIALIZATION_COMPLETE, alias, None, &node_id.to_be_bytes());
            }
            LoginAction::AnnounceProducer { alias, index } => {
                let event_id = event::producer_event_id(node.node_id(), index);
                let state = node.params().producer_state(index);
                let payload = event::event_payload(event_id);
                self.enqueue(state.producer_identified_mti(), alias, None, &payload);
            }
            LoginAction::AnnounceConsumer { alias, index } => {
                let event_id = event::consumer_event_id(node.node_id(), index);
                let state = node.params().consumer_state(index);
                let payload = event::event_payload(event_id);
                self.enqueue(state.consumer_identified_mti(), alias, None, &payload);
            }
            LoginAction::Running => {}
        }
    }

    /// Re-announces every producer/consumer event `node` owns, in response
    /// to an Identify Events request.
    fn identify_events<const AC: usize>(&mut self, node: &NodeEntry<AC>) {
        let alias = node.alias();
        let node_id = node.node_id();
        for index in 0..node.params().producer_count() {
            let event_id = event::producer_event_id(node_id, index);
            let state = node.params().producer_state(index);
            let payload = event::event_payload(event_id);
            self.enqueue(state.producer_identified_mti(), alias, None, &payload);
        }
        for index in 0..node.params().consumer_count() {
            let event_id = event::consumer_event_id(node_id, index);
            let state = node.params().consumer_state(index);
            let payload = event::event_payload(event_id);
            self.enqueue(state.consumer_identified_mti(), alias, None, &payload);
        }
    }

    /// Replies to a Simple Node Ident Info request with the node's
    /// manufacturer and user blocks, read out of the ACDI manufacturer/user
    /// address spaces via the same host hook Configuration Memory access
    /// uses (§4.8, §4.10): SNIP's content is exactly those two blocks,
    /// prefixed with their respective format-version bytes.
    fn simple_node_ident_info<const AC: usize>(&mut self, node: &mut NodeEntry<AC>, sender: Alias) {
        let alias = node.alias();
        let node_id = node.node_id();
        let mut payload: heapless::Vec<u8, SNIP_PAYLOAD_MAX> = heapless::Vec::new();
        let _ = payload.push(SNIP_MANUFACTURER_VERSION);
        let mut mfg = [0u8; SNIP_BLOCK_MAX];
        let got = self
            .host
            .config_mem_read(node_id, openlcb_core::AddressSpace::AcdiManufacturer, 0, &mut mfg);
        for &b in &mfg[..got.min(mfg.len())] {
            if payload.push(b).is_err() {
                break;
            }
        }
        let _ = payload.push(SNIP_USER_VERSION);
        let mut user = [0u8; SNIP_BLOCK_MAX];
        let got = self
            .host
            .config_mem_read(node_id, openlcb_core::AddressSpace::AcdiUser, 0, &mut user);
        for &b in &user[..got.min(user.len())] {
            if payload.push(b).is_err() {
                break;
            }
        }
        self.enqueue(Mti::SIMPLE_NODE_IDENT_INFO_REPLY, alias, Some(sender), &payload);
    }

    /// Advances every configured clock by one 100 ms tick, announcing
    /// minute/date rollovers and stepping any active query-reply sequence.
    /// Call this once per timer tick delivered through
    /// [`openlcb_core::HostInterface::timer_resume`]'s cadence.
    pub fn on_timer_tick<const N: usize, const AC: usize>(&mut self, nodes: &mut NodeTable<N, AC>) {
        for (slot, seq) in self.clocks.iter_mut().zip(self.sequencers.iter_mut()) {
            let events = slot.tick();
            let Some(node) = nodes.find_by_node_id(slot.clock_id) else {
                continue;
            };
            if !node.is_running() {
                continue;
            }
            let alias = node.alias();

            if events.minutes_advanced > 0 {
                let payload = event::event_payload(slot.time_event());
                self.enqueue(Mti::PC_EVENT_REPORT, alias, None, &payload);
            }
            if events.date_rollover {
                let payload = event::event_payload(time::event_for_suffix(slot.clock_id, time::SUFFIX_DATE_ROLLOVER));
                self.enqueue(Mti::PC_EVENT_REPORT, alias, None, &payload);
            }
            if seq.is_active() {
                let next_minute_event = slot.time_event();
                if let Some(step) = seq.advance(slot, next_minute_event) {
                    let (mti, payload) = step.frame();
                    self.enqueue(mti, alias, None, &payload);
                }
            }
        }
    }
}

/// `true` if `node` is running and either the message is a broadcast or
/// addressed specifically to it.
fn does_node_process_msg<const AC: usize>(node: &NodeEntry<AC>, message: &Message) -> bool {
    if !node.is_running() {
        return false;
    }
    match message.dest() {
        Some(dest) => dest.alias == node.alias(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferFifo;
    use crate::node::NodeParameters;
    use core::cell::RefCell;
    use openlcb_core::AddressSpace;

    struct TestSegment;
    impl SegmentId for TestSegment {}

    #[derive(Default)]
    struct TestHost {
        sent: RefCell<heapless::Vec<CanFrame, 32>>,
        storage: RefCell<[u8; 16]>,
    }

    impl HostInterface<TestSegment> for TestHost {
        fn can_tx_try_send(&self, frame: CanFrame) -> nb::Result<(), Infallible> {
            let _ = self.sent.borrow_mut().push(frame);
            Ok(())
        }
        fn can_tx_buffer_clear(&self) -> bool {
            true
        }
        fn can_rx_pause(&self) {}
        fn can_rx_resume(&self) {}
        fn timer_pause(&self) {}
        fn timer_resume(&self) {}
        fn config_mem_read(&self, _node: NodeId, _space: AddressSpace, address: u32, buf: &mut [u8]) -> usize {
            let storage = self.storage.borrow();
            let start = address as usize;
            let n = buf.len().min(storage.len().saturating_sub(start));
            buf[..n].copy_from_slice(&storage[start..start + n]);
            n
        }
        fn config_mem_write(&self, _node: NodeId, _space: AddressSpace, address: u32, buf: &[u8]) -> usize {
            let mut storage = self.storage.borrow_mut();
            let start = address as usize;
            let n = buf.len().min(storage.len().saturating_sub(start));
            storage[start..start + n].copy_from_slice(&buf[..n]);
            n
        }
        fn reboot(&self) {}
        fn factory_reset(&self, _node: NodeId) {}
    }

    type TestPool = BufferPool<4, 4, 2, 1>;
    type TestNodes = NodeTable<2, 4>;
    type Machine = MainStateMachine<TestSegment, TestHost, 2, 2, 32>;

    fn drive_login(machine: &mut Machine, pool: &mut TestPool, nodes: &mut TestNodes) {
        for _ in 0..128 {
            let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
            if !machine.run_once(pool, nodes, &mut incoming) {
                break;
            }
        }
    }

    #[test]
    fn verify_node_id_global_gets_a_reply() {
        let mut machine = Machine::new(TestHost::default());
        let mut pool = TestPool::new();
        let mut nodes: TestNodes = NodeTable::new();
        nodes.allocate(NodeId::new(0x0102_0304_0506), NodeParameters::minimal(0, 0)).unwrap();

        drive_login(&mut machine, &mut pool, &mut nodes);
        assert!(nodes.iter().next().unwrap().is_running());
        machine.host().sent.borrow_mut().clear();

        let sender = Alias::new(0x042);
        let handle = pool.allocate(&[]).unwrap();
        let message = Message::new(Mti::VERIFY_NODE_ID_GLOBAL, sender, None, None, handle);
        let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
        incoming.push(message);

        while machine.run_once(&mut pool, &mut nodes, &mut incoming) {}

        assert!(machine.host().sent.borrow().iter().any(|f| {
            matches!(
                can::Identifier::from_extended_id(f.id()),
                Some(can::Identifier::Mti { mti: Mti::VERIFIED_NODE_ID, .. })
            )
        }));
    }

    #[test]
    fn config_memory_read_round_trips_through_the_host() {
        let mut machine = Machine::new(TestHost::default());
        let mut pool = TestPool::new();
        let mut nodes: TestNodes = NodeTable::new();
        nodes.allocate(NodeId::new(1), NodeParameters::minimal(0, 0)).unwrap();
        drive_login(&mut machine, &mut pool, &mut nodes);
        machine.host().sent.borrow_mut().clear();

        machine.host_mut().storage.borrow_mut()[0..4].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let sender = Alias::new(0x005);
        let body = [0x20u8, 0x41, 0x00, 0x00, 0x00, 0x00, 0x04];
        let handle = pool.allocate(&body).unwrap();
        let dest = crate::message::Destination { alias: nodes.iter().next().unwrap().alias(), node_id: None };
        let message = Message::new(Mti::DATAGRAM, sender, None, Some(dest), handle);
        let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
        incoming.push(message);

        while machine.run_once(&mut pool, &mut nodes, &mut incoming) {}

        let sent = machine.host().sent.borrow();
        let ok_count = sent
            .iter()
            .filter(|f| {
                matches!(
                    can::Identifier::from_extended_id(f.id()),
                    Some(can::Identifier::Mti { mti: Mti::DATAGRAM_OK_REPLY, .. })
                )
            })
            .count();
        assert_eq!(ok_count, 1);

        let mut reassembled: heapless::Vec<u8, 32> = heapless::Vec::new();
        for frame in sent.iter().filter(|f| {
            matches!(
                can::Identifier::from_extended_id(f.id()),
                Some(can::Identifier::Mti { mti: Mti::DATAGRAM, .. })
            )
        }) {
            for &b in &frame.data()[2..] {
                let _ = reassembled.push(b);
            }
        }
        assert_eq!(reassembled.as_slice(), &[0x20, 0x51, 0, 0, 0, 0, 0xAA, 0xBB, 0xCC, 0xDD]);

        let ok_frame = sent
            .iter()
            .find(|f| {
                matches!(
                    can::Identifier::from_extended_id(f.id()),
                    Some(can::Identifier::Mti { mti: Mti::DATAGRAM_OK_REPLY, .. })
                )
            })
            .unwrap();
        assert_eq!(&ok_frame.data()[2..], &[0x81]);
    }

    #[test]
    fn get_address_space_info_on_an_unsupported_space_reports_not_present() {
        let mut machine = Machine::new(TestHost::default());
        let mut pool = TestPool::new();
        let mut nodes: TestNodes = NodeTable::new();
        nodes.allocate(NodeId::new(4), NodeParameters::minimal(0, 0)).unwrap();
        drive_login(&mut machine, &mut pool, &mut nodes);
        machine.host().sent.borrow_mut().clear();

        let sender = Alias::new(0x006);
        let body = [0x20u8, 0x84, AddressSpace::TractionConfig.as_byte()];
        let handle = pool.allocate(&body).unwrap();
        let dest = crate::message::Destination { alias: nodes.iter().next().unwrap().alias(), node_id: None };
        let message = Message::new(Mti::DATAGRAM, sender, None, Some(dest), handle);
        let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
        incoming.push(message);

        while machine.run_once(&mut pool, &mut nodes, &mut incoming) {}

        let sent = machine.host().sent.borrow();
        let mut reassembled: heapless::Vec<u8, 8> = heapless::Vec::new();
        for frame in sent.iter().filter(|f| {
            matches!(
                can::Identifier::from_extended_id(f.id()),
                Some(can::Identifier::Mti { mti: Mti::DATAGRAM, .. })
            )
        }) {
            for &b in &frame.data()[2..] {
                let _ = reassembled.push(b);
            }
        }
        assert_eq!(reassembled.as_slice(), &[0x20, 0x87, AddressSpace::TractionConfig.as_byte()]);
    }

    #[test]
    fn message_to_a_node_still_logging_in_is_silently_dropped() {
        let mut machine = Machine::new(TestHost::default());
        let mut pool = TestPool::new();
        let mut nodes: TestNodes = NodeTable::new();
        nodes.allocate(NodeId::new(2), NodeParameters::minimal(0, 0)).unwrap();

        let sender = Alias::new(0x007);
        let handle = pool.allocate(&[]).unwrap();
        let message = Message::new(Mti::TRACTION_CONTROL_COMMAND, sender, None, None, handle);
        let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
        incoming.push(message);

        // Node has not finished login yet, so it must not process the message;
        // only its own login-handshake frames may appear in `sent`.
        while machine.run_once(&mut pool, &mut nodes, &mut incoming) {}
        assert!(machine.host().sent.borrow().iter().all(|f| {
            !matches!(
                can::Identifier::from_extended_id(f.id()),
                Some(can::Identifier::Mti { mti: Mti::OPTIONAL_INTERACTION_REJECTED, .. })
            )
        }));
    }

    #[test]
    fn a_full_transmit_buffer_leaves_the_frame_queued_for_retry() {
        struct BlockingHost {
            allow: RefCell<bool>,
            sent: RefCell<heapless::Vec<CanFrame, 8>>,
        }
        impl HostInterface<TestSegment> for BlockingHost {
            fn can_tx_try_send(&self, frame: CanFrame) -> nb::Result<(), Infallible> {
                if *self.allow.borrow() {
                    let _ = self.sent.borrow_mut().push(frame);
                    Ok(())
                } else {
                    Err(nb::Error::WouldBlock)
                }
            }
            fn can_tx_buffer_clear(&self) -> bool {
                *self.allow.borrow()
            }
            fn can_rx_pause(&self) {}
            fn can_rx_resume(&self) {}
            fn timer_pause(&self) {}
            fn timer_resume(&self) {}
            fn config_mem_read(&self, _: NodeId, _: AddressSpace, _: u32, _: &mut [u8]) -> usize {
                0
            }
            fn config_mem_write(&self, _: NodeId, _: AddressSpace, _: u32, _: &[u8]) -> usize {
                0
            }
            fn reboot(&self) {}
            fn factory_reset(&self, _: NodeId) {}
        }

        let host = BlockingHost { allow: RefCell::new(false), sent: RefCell::new(heapless::Vec::new()) };
        let mut machine: MainStateMachine<TestSegment, BlockingHost, 2, 2, 32> = MainStateMachine::new(host);
        let mut pool: TestPool = BufferPool::new();
        let mut nodes: TestNodes = NodeTable::new();
        nodes.allocate(NodeId::new(7), NodeParameters::minimal(0, 0)).unwrap();

        // First login step enqueues a CID7 frame; the blocked host refuses it
        // every time the outbox is drained, so the frame must stay queued
        // rather than being dropped or skipped.
        for _ in 0..5 {
            let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
            machine.run_once(&mut pool, &mut nodes, &mut incoming);
        }
        assert!(machine.host().sent.borrow().is_empty());

        *machine.host().allow.borrow_mut() = true;
        let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
        machine.run_once(&mut pool, &mut nodes, &mut incoming);
        assert_eq!(machine.host().sent.borrow().len(), 1);
    }

    #[test]
    fn simple_node_ident_info_request_gets_a_reply_with_both_version_bytes() {
        let mut machine = Machine::new(TestHost::default());
        let mut pool = TestPool::new();
        let mut nodes: TestNodes = NodeTable::new();
        nodes.allocate(NodeId::new(3), NodeParameters::minimal(0, 0)).unwrap();
        drive_login(&mut machine, &mut pool, &mut nodes);
        machine.host().sent.borrow_mut().clear();

        machine.host_mut().storage.borrow_mut()[0] = b'A';

        let sender = Alias::new(0x009);
        let handle = pool.allocate(&[]).unwrap();
        let dest = crate::message::Destination { alias: nodes.iter().next().unwrap().alias(), node_id: None };
        let message = Message::new(Mti::SIMPLE_NODE_IDENT_INFO_REQUEST, sender, None, Some(dest), handle);
        let mut incoming: BufferFifo<Message, 1> = BufferFifo::new();
        incoming.push(message);

        while machine.run_once(&mut pool, &mut nodes, &mut incoming) {}

        let sent = machine.host().sent.borrow();
        let mut reassembled: heapless::Vec<u8, 96> = heapless::Vec::new();
        for frame in sent.iter().filter(|f| {
            matches!(
                can::Identifier::from_extended_id(f.id()),
                Some(can::Identifier::Mti { mti: Mti::SIMPLE_NODE_IDENT_INFO_REPLY, .. })
            )
        }) {
            for &b in &frame.data()[2..] {
                let _ = reassembled.push(b);
            }
        }
        assert_eq!(reassembled[0], 4);
        assert_eq!(reassembled[1], b'A');
    }
}
