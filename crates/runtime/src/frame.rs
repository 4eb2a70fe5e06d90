use crate::Value;
use std::fmt;

/// The variants of control frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameKind {
    /// The process's root recovery point, installed once at startup
    #[default]
    Primordial,
    /// A labeled body that `go` can re-enter
    Tagbody,
    /// A named exit point for `return-from`
    Block,
    /// A dynamic exit point for `throw`, identified by a tag value
    Catch,
    /// A construct whose cleanup runs whenever control leaves its body
    UnwindProtect,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primordial => "primordial",
            Self::Tagbody => "tagbody",
            Self::Block => "block",
            Self::Catch => "catch",
            Self::UnwindProtect => "unwind-protect",
        };
        f.write_str(name)
    }
}

/// A generation-checked handle to a frame slot in the [FramePool](crate::FramePool)
///
/// The generation lets the pool reuse slots while still detecting access
/// through a handle whose frame has already been released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// A handle to a [Tag] in the context's tag arena
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagId(pub(crate) u32);

/// A checkpoint of the context's dynamic state, taken when a frame is pushed
///
/// Restoring a snapshot rolls the context back to the exact state it had when
/// the owning construct was entered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// The dynamic-binding save stack length
    pub bindings_mark: usize,
    /// The control chain head, i.e. the previous frame
    pub chain_head: Option<FrameId>,
    /// The active tag chain head
    pub tag_head: Option<TagId>,
    /// The head of the active unwind-protect list
    pub protect_head: Option<FrameId>,
    /// The evaluation stack length
    pub stack_mark: usize,
    /// The call depth counter
    pub call_depth: usize,
}

/// A control frame: a checkpoint of dynamic state plus an abrupt-exit target
///
/// Frames form a singly linked chain from the newest construct down to the
/// primordial frame. A frame never owns its `next`; the chain as a whole is
/// owned by the [FramePool](crate::FramePool).
#[derive(Clone, Debug, Default)]
pub struct Frame {
    /// The frame's variant
    pub kind: FrameKind,
    /// The dynamic state to restore when this frame is the target of a jump
    pub snapshot: Snapshot,
    /// Block frames: the name matched by `return-from`
    pub name: Value,
    /// Catch frames: the tag value matched by `throw`
    pub tag: Value,
    next: Option<FrameId>,
}

impl Frame {
    pub(crate) fn with(kind: FrameKind, snapshot: Snapshot) -> Self {
        Self {
            kind,
            snapshot,
            ..Self::default()
        }
    }

    /// The previous frame in the chain
    pub fn next(&self) -> Option<FrameId> {
        self.next
    }

    /// Links this frame to the previous frame in the chain
    ///
    /// A frame linked to itself means the chain construction logic is broken,
    /// so the violation is fatal rather than a recoverable error.
    pub fn set_next(&mut self, self_id: FrameId, next: Option<FrameId>) {
        if next == Some(self_id) {
            panic!("Frame::set_next: frame {self_id} linked to itself");
        }
        self.next = next;
    }

    /// Zeroes the frame so no snapshot data survives reuse
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A jump target registered for one label in a tagbody
///
/// Tags share the dynamic extent of their owning tagbody frame; a tag is only
/// valid to jump to while that frame is still live on the chain. Iteration
/// order of the chain formed by `next` is declaration order.
#[derive(Clone, Debug)]
pub struct Tag {
    /// The label value, a symbol or small integer
    pub name: Value,
    /// The owning tagbody frame
    pub tagbody: FrameId,
    /// The statement index execution resumes at when jumping to this tag
    pub index: usize,
    /// The next tag declared in the same tagbody, then the enclosing chain
    pub next: Option<TagId>,
}
