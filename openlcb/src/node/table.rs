//! The fixed-size table of logical nodes hosted by this process (§4.2).
//!
//! Grounded on `openlcb_node.h`'s `OpenLcbNode` table: `allocate`,
//! `get_first`/`get_next` (keyed enumeration cursors the dispatcher uses to
//! give every hosted node a turn each main loop iteration, and separately
//! to round-robin the login sequence, without the two enumerations
//! colliding), `find_by_alias`/`find_by_node_id`, and `_100ms_timer_tick`.

use crate::event::EventState;
use crate::node::alias::AliasMappingCache;
use crate::node::login::Login;
use openlcb_core::{Alias, NodeId};

/// Maximum number of producer/consumer events a [`NodeParameters`] tracks
/// individual validity state for. An event at an index at or beyond this
/// bound still exists (it counts toward `producer_count`/`consumer_count`
/// and is announced/identified) but always reports
/// [`EventState::Unknown`], same as a node with no per-event state store.
const MAX_TRACKED_EVENTS: usize = 16;

/// Static per-node configuration: how many producer/consumer events it
/// owns, and the current validity state (§4.9) of each. A full deployment
/// would also carry SNIP strings and a PIP bitmask; this engine keeps those
/// behind [`crate::event`]/host callbacks rather than inflating this
/// struct, since neither changes the dispatch logic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeParameters {
    producer_count: usize,
    consumer_count: usize,
    producer_states: heapless::Vec<EventState, MAX_TRACKED_EVENTS>,
    consumer_states: heapless::Vec<EventState, MAX_TRACKED_EVENTS>,
}

impl NodeParameters {
    /// A node with `producer_count` producer events and `consumer_count`
    /// consumer events, numbered `0..count` as event suffixes. Every event's
    /// validity state starts [`EventState::Unknown`]; set it with
    /// [`set_producer_state`](Self::set_producer_state)/
    /// [`set_consumer_state`](Self::set_consumer_state).
    pub fn minimal(producer_count: usize, consumer_count: usize) -> Self {
        let mut producer_states = heapless::Vec::new();
        for _ in 0..producer_count.min(MAX_TRACKED_EVENTS) {
            let _ = producer_states.push(EventState::Unknown);
        }
        let mut consumer_states = heapless::Vec::new();
        for _ in 0..consumer_count.min(MAX_TRACKED_EVENTS) {
            let _ = consumer_states.push(EventState::Unknown);
        }
        Self {
            producer_count,
            consumer_count,
            producer_states,
            consumer_states,
        }
    }

    /// How many producer events this node owns.
    pub const fn producer_count(&self) -> usize {
        self.producer_count
    }

    /// How many consumer events this node owns.
    pub const fn consumer_count(&self) -> usize {
        self.consumer_count
    }

    /// The current validity state of producer event `index`.
    pub fn producer_state(&self, index: usize) -> EventState {
        self.producer_states.get(index).copied().unwrap_or(EventState::Unknown)
    }

    /// The current validity state of consumer event `index`.
    pub fn consumer_state(&self, index: usize) -> EventState {
        self.consumer_states.get(index).copied().unwrap_or(EventState::Unknown)
    }

    /// Sets producer event `index`'s validity state. A no-op if `index` is
    /// at or beyond [`MAX_TRACKED_EVENTS`].
    pub fn set_producer_state(&mut self, index: usize, state: EventState) {
        if let Some(slot) = self.producer_states.get_mut(index) {
            *slot = state;
        }
    }

    /// Sets consumer event `index`'s validity state. A no-op if `index` is
    /// at or beyond [`MAX_TRACKED_EVENTS`].
    pub fn set_consumer_state(&mut self, index: usize, state: EventState) {
        if let Some(slot) = self.consumer_states.get_mut(index) {
            *slot = state;
        }
    }
}

/// One hosted logical node: its identity, login progress, and parameters.
pub struct NodeEntry<const ALIAS_CACHE: usize> {
    node_id: NodeId,
    params: NodeParameters,
    login: Login,
    foreign_aliases: AliasMappingCache<ALIAS_CACHE>,
}

impl<const ALIAS_CACHE: usize> NodeEntry<ALIAS_CACHE> {
    fn new(node_id: NodeId, params: NodeParameters) -> Self {
        Self {
            node_id,
            params,
            login: Login::start(node_id),
            foreign_aliases: AliasMappingCache::new(),
        }
    }

    /// The node's permanent 48-bit identity.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The node's current (or candidate) CAN alias.
    pub fn alias(&self) -> Alias {
        self.login.alias()
    }

    /// `true` once this node has finished logging in.
    pub fn is_running(&self) -> bool {
        self.login.is_running()
    }

    /// This node's static parameters, including per-event validity state.
    pub fn params(&self) -> &NodeParameters {
        &self.params
    }

    /// Mutable access to this node's parameters, to update an event's
    /// validity state as the host's application logic changes it.
    pub fn params_mut(&mut self) -> &mut NodeParameters {
        &mut self.params
    }

    /// Mutable access to this node's login sequencer. Main-loop only.
    pub fn login_mut(&mut self) -> &mut Login {
        &mut self.login
    }

    /// This node's view of other nodes' aliases. Safe from either context.
    pub fn foreign_aliases(&self) -> &AliasMappingCache<ALIAS_CACHE> {
        &self.foreign_aliases
    }

    /// Mutable access to this node's foreign-alias cache. Main-loop only,
    /// except [`AliasMappingCache::set_duplicate_detected`], which the CAN
    /// driver's callback context may also call (§1.3).
    pub fn foreign_aliases_mut(&mut self) -> &mut AliasMappingCache<ALIAS_CACHE> {
        &mut self.foreign_aliases
    }
}

/// An error allocating a new node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TableError {
    /// The table is already holding its maximum number of nodes.
    Full,
}

/// Maximum number of distinct enumeration keys a [`NodeTable`] tracks at
/// once. The dispatcher uses one key for walking a message against every
/// hosted node and another for the login round-robin; room is left for a
/// caller to key a nested enumeration (e.g. identify-events) without
/// colliding with either.
const MAX_ENUMERATION_KEYS: usize = 4;

/// The fixed-size table of every node this process hosts on one CAN
/// segment.
///
/// `get_first`/`get_next` enumerate in round-robin order, keyed by a
/// caller-chosen `u8` (§4.3): each distinct key owns its own cursor, stored
/// in a small fixed table, so two enumerations driven by different keys
/// never see each other's position even if one is started while the other
/// is mid-walk.
pub struct NodeTable<const N: usize, const ALIAS_CACHE: usize = 8> {
    nodes: heapless::Vec<NodeEntry<ALIAS_CACHE>, N>,
    // `None` in the inner `Option` means the key has never returned a node
    // yet, so the next `get_next` should land on index 0 rather than 1.
    cursors: [Option<(u8, Option<usize>)>; MAX_ENUMERATION_KEYS],
}

impl<const N: usize, const ALIAS_CACHE: usize> NodeTable<N, ALIAS_CACHE> {
    /// Builds an empty table.
    pub const fn new() -> Self {
        Self {
            nodes: heapless::Vec::new(),
            cursors: [None; MAX_ENUMERATION_KEYS],
        }
    }

    fn cursor_slot(&mut self, key: u8) -> &mut Option<(u8, Option<usize>)> {
        if let Some(index) = self.cursors.iter().position(|c| matches!(c, Some((k, _)) if *k == key)) {
            return &mut self.cursors[index];
        }
        let index = self
            .cursors
            .iter()
            .position(|c| c.is_none())
            .unwrap_or(0);
        self.cursors[index] = Some((key, None));
        &mut self.cursors[index]
    }

    /// Adds a new node, starting its login sequence immediately.
    pub fn allocate(
        &mut self,
        node_id: NodeId,
        params: NodeParameters,
    ) -> Result<(), TableError> {
        self.nodes
            .push(NodeEntry::new(node_id, params))
            .map_err(|_| TableError::Full)
    }

    /// How many nodes this table hosts.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if no nodes have been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The first node, resetting `key`'s enumeration cursor to it.
    pub fn get_first(&mut self, key: u8) -> Option<&mut NodeEntry<ALIAS_CACHE>> {
        if self.nodes.is_empty() {
            return None;
        }
        let slot = self.cursor_slot(key);
        *slot = Some((key, Some(0)));
        self.nodes.get_mut(0)
    }

    /// The node after the one last returned by [`get_first`](Self::get_first)
    /// or [`get_next`](Self::get_next) for this same `key`, wrapping back to
    /// the first node after the last; the first ever call for a fresh key
    /// lands on node 0. Unrelated keys keep their own position, so a nested
    /// enumeration under a different key does not disturb this one.
    pub fn get_next(&mut self, key: u8) -> Option<&mut NodeEntry<ALIAS_CACHE>> {
        if self.nodes.is_empty() {
            return None;
        }
        let slot = self.cursor_slot(key);
        let position = match slot {
            Some((_, last)) => {
                let next = match *last {
                    Some(position) => (position + 1) % self.nodes.len(),
                    None => 0,
                };
                *last = Some(next);
                next
            }
            None => unreachable!("cursor_slot always returns Some"),
        };
        self.nodes.get_mut(position)
    }

    /// Finds a hosted node by its current CAN alias.
    pub fn find_by_alias(&mut self, alias: Alias) -> Option<&mut NodeEntry<ALIAS_CACHE>> {
        self.nodes.iter_mut().find(|n| n.alias() == alias)
    }

    /// Finds a hosted node by its permanent node id.
    pub fn find_by_node_id(&mut self, node_id: NodeId) -> Option<&mut NodeEntry<ALIAS_CACHE>> {
        self.nodes.iter_mut().find(|n| n.node_id() == node_id)
    }

    /// An iterator over every hosted node.
    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry<ALIAS_CACHE>> {
        self.nodes.iter()
    }

    /// A mutable iterator over every hosted node.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeEntry<ALIAS_CACHE>> {
        self.nodes.iter_mut()
    }
}

impl<const N: usize, const ALIAS_CACHE: usize> Default for NodeTable<N, ALIAS_CACHE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_find() {
        let mut table: NodeTable<4> = NodeTable::new();
        let id = NodeId::new(0x0102_0304_0506);
        table.allocate(id, NodeParameters::minimal(0, 0)).unwrap();
        assert!(table.find_by_node_id(id).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn table_reports_full() {
        let mut table: NodeTable<1> = NodeTable::new();
        table
            .allocate(NodeId::new(1), NodeParameters::minimal(0, 0))
            .unwrap();
        assert_eq!(
            table.allocate(NodeId::new(2), NodeParameters::minimal(0, 0)),
            Err(TableError::Full)
        );
    }

    #[test]
    fn enumeration_cursor_wraps_around() {
        let mut table: NodeTable<3> = NodeTable::new();
        for i in 1..=3u64 {
            table
                .allocate(NodeId::new(i), NodeParameters::minimal(0, 0))
                .unwrap();
        }
        let first = table.get_first(0).unwrap().node_id();
        let second = table.get_next(0).unwrap().node_id();
        let third = table.get_next(0).unwrap().node_id();
        let wrapped = table.get_next(0).unwrap().node_id();
        assert_eq!(first, NodeId::new(1));
        assert_eq!(second, NodeId::new(2));
        assert_eq!(third, NodeId::new(3));
        assert_eq!(wrapped, first);
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let mut table: NodeTable<3> = NodeTable::new();
        for i in 1..=3u64 {
            table
                .allocate(NodeId::new(i), NodeParameters::minimal(0, 0))
                .unwrap();
        }
        let dispatch_first = table.get_first(0).unwrap().node_id();
        assert_eq!(dispatch_first, NodeId::new(1));

        // Starting a second, differently-keyed enumeration midway through
        // the first must not disturb the first's position.
        let login_first = table.get_first(1).unwrap().node_id();
        assert_eq!(login_first, NodeId::new(1));
        let login_second = table.get_next(1).unwrap().node_id();
        assert_eq!(login_second, NodeId::new(2));

        let dispatch_second = table.get_next(0).unwrap().node_id();
        assert_eq!(dispatch_second, NodeId::new(2));
    }
}
