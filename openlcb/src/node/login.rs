//! The CAN alias login state machine (§4.2, §8 S2/S3).
//!
//! Mirrors the teacher's `configure()` → `finalize()` state transition
//! shape (`bus::CanConfigurable` → `bus::Can`): a node starts in an
//! unconfigured, alias-less state and only becomes eligible to carry
//! traffic once login completes.
//!
//! Priority order matches `OpenLcbMainStatemachine_run`'s documented
//! sequence (§4.6): a node never advances past Initialization Complete and
//! the producer/consumer broadcast steps until the steps ahead of it in
//! this enum are done, and a detected collision unconditionally restarts
//! from [`LoginState::SendCid7`] under a freshly generated alias.

use crate::node::alias::generate;
use openlcb_core::{Alias, NodeId};

/// Which CID frame (or later step) a node in the login sequence is on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoginState {
    /// Check-Id, Node ID bits 47:36.
    SendCid7,
    /// Check-Id, Node ID bits 35:24.
    SendCid6,
    /// Check-Id, Node ID bits 23:12.
    SendCid5,
    /// Check-Id, Node ID bits 11:0.
    SendCid4,
    /// Waiting 200 ms (two 100 ms ticks) after the last CID, listening for a
    /// conflicting reply before claiming the alias.
    Wait200ms {
        /// Remaining 100 ms ticks before the wait is over.
        ticks_remaining: u8,
    },
    /// Send Reserve-Id.
    SendRid,
    /// Send Alias Map Definition.
    SendAmd,
    /// Send Initialization Complete.
    SendInitComplete,
    /// Broadcasting this node's producer events, one per main loop iteration.
    BroadcastProducerEvents {
        /// Index of the next producer event to announce.
        cursor: usize,
    },
    /// Broadcasting this node's consumer events, one per main loop iteration.
    BroadcastConsumerEvents {
        /// Index of the next consumer event to announce.
        cursor: usize,
    },
    /// Logged in; the node is fully on the bus.
    Run,
}

/// What the dispatcher should do this step of the login sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoginAction {
    /// Send the given CID frame, carrying `alias` and the stated 12-bit
    /// slice of `node_id`.
    SendCid {
        /// Which CID frame, 7 down to 4.
        frame: u8,
        alias: Alias,
        node_id: NodeId,
    },
    /// Nothing to send this step; still waiting out the 200 ms window.
    Waiting,
    /// Send Reserve-Id.
    SendRid { alias: Alias },
    /// Send Alias Map Definition.
    SendAmd { alias: Alias, node_id: NodeId },
    /// Send Initialization Complete.
    SendInitComplete { alias: Alias, node_id: NodeId },
    /// Announce the producer event at `index`.
    AnnounceProducer { alias: Alias, index: usize },
    /// Announce the consumer event at `index`.
    AnnounceConsumer { alias: Alias, index: usize },
    /// Login is done; normal traffic may flow.
    Running,
}

/// Drives one node's alias acquisition and initial event announcements.
pub struct Login {
    state: LoginState,
    seed: u64,
    alias: Alias,
}

impl Login {
    /// Starts a fresh login for `node_id`, generating the first seed/alias
    /// pair.
    pub fn start(node_id: NodeId) -> Self {
        let (seed, alias) = generate(crate::node::alias::initial_seed(node_id));
        Self {
            state: LoginState::SendCid7,
            seed,
            alias,
        }
    }

    /// The alias currently being claimed (or held, once [`LoginState::Run`]).
    pub fn alias(&self) -> Alias {
        self.alias
    }

    /// The login sequence's current state.
    pub fn state(&self) -> LoginState {
        self.state
    }

    /// `true` once login has completed and ordinary traffic may flow.
    pub fn is_running(&self) -> bool {
        matches!(self.state, LoginState::Run)
    }

    /// Restarts the sequence under a newly generated alias (§8 S3): a
    /// foreign frame carrying our candidate alias arrived before we reached
    /// [`LoginState::SendRid`].
    pub fn restart_on_conflict(&mut self) {
        let (seed, alias) = generate(self.seed);
        self.seed = seed;
        self.alias = alias;
        self.state = LoginState::SendCid7;
    }

    /// Advances the state machine by one main-loop iteration and returns
    /// what the dispatcher should transmit, if anything.
    ///
    /// `producer_count`/`consumer_count` size the broadcast steps; the
    /// dispatcher resolves `index` to an actual event id via the node's
    /// own producer/consumer tables.
    pub fn advance(
        &mut self,
        node_id: NodeId,
        producer_count: usize,
        consumer_count: usize,
    ) -> LoginAction {
        match self.state {
            LoginState::SendCid7 => {
                self.state = LoginState::SendCid6;
                LoginAction::SendCid {
                    frame: 7,
                    alias: self.alias,
                    node_id,
                }
            }
            LoginState::SendCid6 => {
                self.state = LoginState::SendCid5;
                LoginAction::SendCid {
                    frame: 6,
                    alias: self.alias,
                    node_id,
                }
            }
            LoginState::SendCid5 => {
                self.state = LoginState::SendCid4;
                LoginAction::SendCid {
                    frame: 5,
                    alias: self.alias,
                    node_id,
                }
            }
            LoginState::SendCid4 => {
                self.state = LoginState::Wait200ms { ticks_remaining: 2 };
                LoginAction::SendCid {
                    frame: 4,
                    alias: self.alias,
                    node_id,
                }
            }
            LoginState::Wait200ms { ticks_remaining } => {
                if ticks_remaining <= 1 {
                    self.state = LoginState::SendRid;
                } else {
                    self.state = LoginState::Wait200ms {
                        ticks_remaining: ticks_remaining - 1,
                    };
                }
                LoginAction::Waiting
            }
            LoginState::SendRid => {
                self.state = LoginState::SendAmd;
                LoginAction::SendRid { alias: self.alias }
            }
            LoginState::SendAmd => {
                self.state = LoginState::SendInitComplete;
                LoginAction::SendAmd {
                    alias: self.alias,
                    node_id,
                }
            }
            LoginState::SendInitComplete => {
                self.state = if producer_count > 0 {
                    LoginState::BroadcastProducerEvents { cursor: 0 }
                } else if consumer_count > 0 {
                    LoginState::BroadcastConsumerEvents { cursor: 0 }
                } else {
                    LoginState::Run
                };
                LoginAction::SendInitComplete {
                    alias: self.alias,
                    node_id,
                }
            }
            LoginState::BroadcastProducerEvents { cursor } => {
                let next = cursor + 1;
                self.state = if next < producer_count {
                    LoginState::BroadcastProducerEvents { cursor: next }
                } else if consumer_count > 0 {
                    LoginState::BroadcastConsumerEvents { cursor: 0 }
                } else {
                    LoginState::Run
                };
                LoginAction::AnnounceProducer {
                    alias: self.alias,
                    index: cursor,
                }
            }
            LoginState::BroadcastConsumerEvents { cursor } => {
                let next = cursor + 1;
                self.state = if next < consumer_count {
                    LoginState::BroadcastConsumerEvents { cursor: next }
                } else {
                    LoginState::Run
                };
                LoginAction::AnnounceConsumer {
                    alias: self.alias,
                    index: cursor,
                }
            }
            LoginState::Run => LoginAction::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_happy_path_sequence() {
        let node_id = NodeId::new(0x0102_0304_0506);
        let mut login = Login::start(node_id);
        let alias = login.alias();

        for expected in [7u8, 6, 5, 4] {
            match login.advance(node_id, 0, 0) {
                LoginAction::SendCid { frame, alias: a, .. } => {
                    assert_eq!(frame, expected);
                    assert_eq!(a, alias);
                }
                other => panic!("unexpected action {other:?}"),
            }
        }
        assert!(matches!(login.advance(node_id, 0, 0), LoginAction::Waiting));
        assert!(matches!(login.advance(node_id, 0, 0), LoginAction::Waiting));
        assert!(matches!(
            login.advance(node_id, 0, 0),
            LoginAction::SendRid { .. }
        ));
        match login.advance(node_id, 0, 0) {
            LoginAction::SendAmd { node_id: n, alias: a } => {
                assert_eq!(n, node_id);
                assert_eq!(a, alias);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(
            login.advance(node_id, 0, 0),
            LoginAction::SendInitComplete { .. }
        ));
        assert!(matches!(login.advance(node_id, 0, 0), LoginAction::Running));
        assert!(login.is_running());
    }

    #[test]
    fn s3_conflict_restarts_at_cid7_with_new_alias() {
        let node_id = NodeId::new(0x0102_0304_0506);
        let mut login = Login::start(node_id);
        let original_alias = login.alias();

        login.advance(node_id, 0, 0); // CID7
        login.advance(node_id, 0, 0); // CID6
        login.advance(node_id, 0, 0); // CID5
        login.restart_on_conflict();

        assert_ne!(login.alias(), original_alias);
        match login.advance(node_id, 0, 0) {
            LoginAction::SendCid { frame, .. } => assert_eq!(frame, 7),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn broadcasts_producer_then_consumer_events() {
        let node_id = NodeId::new(1);
        let mut login = Login::start(node_id);
        for _ in 0..4 {
            login.advance(node_id, 2, 1);
        }
        login.advance(node_id, 2, 1); // RID
        login.advance(node_id, 2, 1); // AMD
        login.advance(node_id, 2, 1); // init complete
        match login.advance(node_id, 2, 1) {
            LoginAction::AnnounceProducer { index, .. } => assert_eq!(index, 0),
            other => panic!("unexpected action {other:?}"),
        }
        match login.advance(node_id, 2, 1) {
            LoginAction::AnnounceProducer { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected action {other:?}"),
        }
        match login.advance(node_id, 2, 1) {
            LoginAction::AnnounceConsumer { index, .. } => assert_eq!(index, 0),
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(login.advance(node_id, 2, 1), LoginAction::Running));
    }
}
