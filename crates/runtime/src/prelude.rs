//! A collection of the most commonly used items from the runtime

pub use crate::{
    Context, ContextSettings, Error, ErrorKind, Flow, FrameId, FrameKind, Result, Unwind, Value,
    control_error,
};
