#![no_std]
#![warn(missing_docs)]
//! # openlcb
//!
//! A portable, allocation-free OpenLCB/LCC node stack: one process can host
//! multiple logical nodes communicating over a CAN segment using the
//! OpenLCB wire protocol.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - CAN alias acquisition and lifecycle (Check-ID / Reserve-ID / AMD / AMR)
//! - CAN frame ↔ OpenLCB message assembly and fragmentation, including
//!   multi-frame reassembly for long messages and datagrams
//! - a segregated, pre-allocated buffer pool with reference counting and
//!   bounded FIFO queues feeding the main dispatcher
//! - the main OpenLCB message dispatcher and addressed/global routing rules
//! - the Datagram subprotocol (0-72 bytes, reliable, OK/rejected replies)
//! - the Configuration Memory subprotocol layered on datagrams
//! - Event Transport (Producer/Consumer Event Reports, Identified/Range)
//! - Broadcast Time, as a representative application protocol
//!
//! All platform-specific details — the CAN transceiver, persisted
//! configuration storage, and a 100 ms timer tick — are covered by
//! [`openlcb_core::HostInterface`], which a board support crate implements.
//!
//! Exclusive access to state shared between the CAN driver context and the
//! main loop context (the buffer pool, the incoming FIFO, alias mapping
//! tables) is serialized with the `critical-section` crate rather than with
//! bespoke lock/unlock callbacks; see [`dispatch`] for details.

pub mod buffer;
pub mod can;
pub mod configmem;
pub mod datagram;
pub mod dispatch;
pub mod event;
pub mod message;
pub mod mti;
pub mod node;
pub mod time;
pub mod util;

pub use openlcb_core as core;
