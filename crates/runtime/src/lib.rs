//! The non-local control-transfer core of the Sable runtime
//!
//! This crate implements the machinery that lets control leave a construct
//! abruptly: named blocks (`return-from`), dynamic catch points (`throw`),
//! labeled bodies (`go`), and guaranteed cleanups (`unwind-protect`).
//!
//! Every construct that can be exited non-locally pushes a [Frame] holding a
//! snapshot of the context's dynamic state. A jump is a typed [Unwind] signal
//! that names its destination frame and propagates through ordinary `Result`
//! returns; each construct it passes releases its own frame (running cleanups
//! where required), and the destination restores its snapshot and consumes
//! the signal.

#![warn(missing_docs)]

mod context;
mod error;
mod frame;
mod nonlocal;
mod pool;
mod value;

pub mod prelude;

pub use crate::{
    context::{BacktraceEntry, Context, ContextSettings, DEFAULT_CALL_DEPTH_LIMIT},
    error::{Error, ErrorKind, Result},
    frame::{Frame, FrameId, FrameKind, Snapshot, Tag, TagId},
    nonlocal::{Flow, Unwind},
    pool::{FRAME_POOL_CAPACITY, FramePool},
    value::Value,
};
