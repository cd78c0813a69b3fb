//! Segregated, pre-allocated payload storage (§4.3).
//!
//! Mirrors the teacher's `messageram` shared-memory arrangement — fixed-size
//! slot arrays sized entirely at build time — except the slot *count* per
//! class is a const generic parameter instead of a `generic_array`/`typenum`
//! length, since there is no SVD register-width constraint here forcing the
//! type-level-number pattern.
//!
//! Every slot carries a reference count so a payload can be referenced by
//! more than one in-flight [`Message`](crate::message::Message) at once
//! (e.g. while it is simultaneously queued for retransmission and for a
//! local callback) without being copied.

mod fifo;
mod pool;

pub use fifo::BufferFifo;
pub use pool::{BufferPool, PayloadHandle, PoolError};
