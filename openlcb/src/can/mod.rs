//! CAN identifier encoding and frame assembly/disassembly (§4.5, §6).

pub mod ident;
pub mod rx;
pub mod tx;

pub use ident::{ControlKind, Identifier};
pub use rx::{ControlEvent, RxAssembler, RxError, RxOutcome};
pub use tx::{amd_frame, amr_frame, cid_frame, emit_frames, rid_frame, TooManyFrames};
