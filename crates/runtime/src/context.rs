use crate::{
    Value,
    frame::{Frame, FrameId, FrameKind, Snapshot, Tag, TagId},
    pool::FramePool,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::{fmt, rc::Rc};

/// The default limit for [Context::call], reinstated by
/// [Context::reset_to_primordial]
pub const DEFAULT_CALL_DEPTH_LIMIT: usize = 10_000;

/// The configurable settings for a [Context]
pub struct ContextSettings {
    /// The maximum call depth before [Context::call] fails with
    /// [CallDepthExceeded](crate::ErrorKind::CallDepthExceeded)
    pub call_depth_limit: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            call_depth_limit: DEFAULT_CALL_DEPTH_LIMIT,
        }
    }
}

/// An execution context: the dynamic state checkpointed by every control frame
///
/// Each context owns exactly one control chain, one tag chain, and one frame
/// pool; contexts are never shared and need no locking.
///
/// The five checkpointed pieces of state are the dynamic-binding save stack,
/// the control chain head, the tag chain head, the active unwind-protect
/// list head, and the evaluation stack, plus the call depth counter.
pub struct Context {
    pub(crate) pool: FramePool,
    pub(crate) tags: Vec<Tag>,
    globals: FxHashMap<Rc<str>, Value>,
    saved_bindings: Vec<(Rc<str>, Option<Value>)>,
    pub(crate) chain_head: Option<FrameId>,
    pub(crate) tag_head: Option<TagId>,
    pub(crate) protect_head: Option<FrameId>,
    pub(crate) stack: Vec<Value>,
    values: Option<SmallVec<[Value; 4]>>,
    pub(crate) call_depth: usize,
    pub(crate) call_depth_limit: usize,
    settings: ContextSettings,
    primordial: Option<FrameId>,
}

impl Default for Context {
    fn default() -> Self {
        Self::with_settings(ContextSettings::default())
    }
}

impl Context {
    /// Initializes a context with the provided settings
    pub fn with_settings(settings: ContextSettings) -> Self {
        Self {
            pool: FramePool::default(),
            tags: Vec::new(),
            globals: FxHashMap::default(),
            saved_bindings: Vec::new(),
            chain_head: None,
            tag_head: None,
            protect_head: None,
            stack: Vec::with_capacity(32),
            values: None,
            call_depth: 0,
            call_depth_limit: settings.call_depth_limit,
            settings,
            primordial: None,
        }
    }

    /// Initializes a context with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a checkpoint of the context's dynamic state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            bindings_mark: self.saved_bindings.len(),
            chain_head: self.chain_head,
            tag_head: self.tag_head,
            protect_head: self.protect_head,
            stack_mark: self.stack.len(),
            call_depth: self.call_depth,
        }
    }

    /// Rolls the context back to a previously taken checkpoint
    pub(crate) fn restore(&mut self, snapshot: &Snapshot) {
        self.unbind_to(snapshot.bindings_mark);
        self.chain_head = snapshot.chain_head;
        self.tag_head = snapshot.tag_head;
        self.protect_head = snapshot.protect_head;
        self.stack.truncate(snapshot.stack_mark);
        self.call_depth = snapshot.call_depth;
    }

    /// Pushes a new frame in front of the current chain head
    ///
    /// The frame is initialized with a snapshot of the context's current
    /// state. Block names and catch tags are set by the construct wrappers in
    /// the same module that matches them.
    pub fn push_frame(&mut self, kind: FrameKind) -> FrameId {
        let snapshot = self.snapshot();
        let id = self.pool.acquire(kind, snapshot);
        let next = self.chain_head;
        self.pool.get_mut(id).set_next(id, next);
        self.chain_head = Some(id);
        if kind == FrameKind::UnwindProtect {
            self.protect_head = Some(id);
        }
        id
    }

    /// Pops a frame on normal exit from its construct
    ///
    /// Only the structural heads are put back; the rest of the context state
    /// (bindings, stack, depth) has evolved legitimately during the
    /// construct's body and is left alone.
    pub fn pop_frame(&mut self, id: FrameId) {
        if self.chain_head != Some(id) {
            panic!("control chain corrupted: popping frame {id} which isn't the chain head");
        }
        let frame = self.pool.get(id);
        let next = frame.next();
        let kind = frame.kind;
        let saved_protect_head = frame.snapshot.protect_head;
        let saved_tag_head = frame.snapshot.tag_head;

        self.chain_head = next;
        match kind {
            FrameKind::UnwindProtect => self.protect_head = saved_protect_head,
            FrameKind::Tagbody => self.tag_head = saved_tag_head,
            _ => {}
        }
        self.pool.release(id);
    }

    /// Consumes a frame as the target of an abrupt jump
    ///
    /// All frames above the target have already been released as the signal
    /// propagated outwards, so the target must be the chain head. Its full
    /// snapshot is restored (the target's own construct is also exiting) and
    /// the frame is returned to the pool.
    pub(crate) fn consume_target(&mut self, id: FrameId) {
        if self.chain_head != Some(id) {
            panic!("control chain corrupted: jump target {id} isn't the chain head");
        }
        let snapshot = self.pool.get(id).snapshot.clone();
        self.restore(&snapshot);
        self.pool.release(id);
    }

    /// The current chain head
    pub fn chain_head(&self) -> Option<FrameId> {
        self.chain_head
    }

    /// The current tag chain head
    pub fn tag_head(&self) -> Option<TagId> {
        self.tag_head
    }

    /// The head of the active unwind-protect list
    pub fn protect_head(&self) -> Option<FrameId> {
        self.protect_head
    }

    /// The frame for a live id
    pub fn frame(&self, id: FrameId) -> &Frame {
        self.pool.get(id)
    }

    /// True if the frame hasn't been released, i.e. its construct's dynamic
    /// extent is still open
    pub fn frame_is_live(&self, id: FrameId) -> bool {
        self.pool.is_live(id)
    }

    /// The current call depth
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// The current call depth limit
    pub fn call_depth_limit(&self) -> usize {
        self.call_depth_limit
    }

    /// Overrides the call depth limit until the next primordial reset
    pub fn set_call_depth_limit(&mut self, limit: usize) {
        self.call_depth_limit = limit;
    }

    // Dynamic bindings

    /// The value of a global (dynamic) variable
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Sets a global variable, replacing the current (possibly shadowed)
    /// value
    pub fn set_global(&mut self, name: Rc<str>, value: Value) {
        self.globals.insert(name, value);
    }

    /// Binds a global variable for a dynamic extent, saving the shadowed
    /// value on the binding save stack
    pub fn bind(&mut self, name: Rc<str>, value: Value) {
        let shadowed = self.globals.insert(name.clone(), value);
        self.saved_bindings.push((name, shadowed));
    }

    /// The current mark of the binding save stack
    pub fn bindings_mark(&self) -> usize {
        self.saved_bindings.len()
    }

    /// Unwinds the binding save stack down to a mark, reinstating shadowed
    /// values in reverse binding order
    pub fn unbind_to(&mut self, mark: usize) {
        while self.saved_bindings.len() > mark {
            let Some((name, shadowed)) = self.saved_bindings.pop() else {
                break;
            };
            match shadowed {
                Some(value) => {
                    self.globals.insert(name, value);
                }
                None => {
                    self.globals.remove(&name);
                }
            }
        }
    }

    // Evaluation stack

    /// Pushes a value onto the evaluation stack
    pub fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops a value from the evaluation stack
    pub fn pop_value(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    /// The evaluation stack's current length
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// The values pushed since the given mark
    pub fn stack_from(&self, mark: usize) -> &[Value] {
        &self.stack[mark..]
    }

    /// Truncates the evaluation stack back to a mark
    pub fn truncate_stack(&mut self, mark: usize) {
        self.stack.truncate(mark);
    }

    /// A copy of the evaluation stack, used for fault diagnostics
    pub fn stack_snapshot(&self) -> Vec<Value> {
        self.stack.clone()
    }

    // Multiple values

    /// Records a multiple-values group produced by the current form
    pub fn set_values(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values = Some(values.into_iter().collect());
    }

    /// Takes the current multiple-values group, if one was produced
    pub fn take_values(&mut self) -> Option<SmallVec<[Value; 4]>> {
        self.values.take()
    }

    /// Discards any recorded multiple-values group
    pub fn clear_values(&mut self) {
        self.values = None;
    }

    // Primordial frame and recovery support

    /// Installs the primordial frame as the root of the control chain
    ///
    /// Idempotent; the primordial frame is created once per context and is
    /// never released.
    pub fn install_primordial(&mut self) -> FrameId {
        if let Some(id) = self.primordial {
            return id;
        }
        let id = self.push_frame(FrameKind::Primordial);
        self.primordial = Some(id);
        id
    }

    /// The primordial frame, if installed
    pub fn primordial(&self) -> Option<FrameId> {
        self.primordial
    }

    /// Resets the context so the primordial frame is the sole live frame
    ///
    /// Frames stranded above the primordial frame (e.g. after a fault jumped
    /// straight over their constructs) are released without running any
    /// cleanups; runtime state is untrusted at that point. All per-iteration
    /// state is cleared so a fault during one top-level form can't corrupt
    /// the next.
    pub fn reset_to_primordial(&mut self) {
        let primordial = self.install_primordial();
        while let Some(id) = self.chain_head {
            if id == primordial {
                break;
            }
            let next = self.pool.get(id).next();
            self.pool.release(id);
            self.chain_head = next;
        }
        self.chain_head = Some(primordial);
        self.tags.clear();
        self.tag_head = None;
        self.protect_head = None;
        self.unbind_to(0);
        self.stack.clear();
        self.values = None;
        self.call_depth = 0;
        self.call_depth_limit = self.settings.call_depth_limit;
    }

    /// Walks the control chain from the head, producing at most `max_frames`
    /// entries
    ///
    /// Used by the recovery driver to publish a bounded backtrace after a
    /// fault.
    pub fn backtrace(&self, max_frames: usize) -> Vec<BacktraceEntry> {
        let mut entries = Vec::new();
        let mut cursor = self.chain_head;
        while let Some(id) = cursor {
            if entries.len() >= max_frames {
                break;
            }
            let frame = self.pool.get(id);
            let detail = match frame.kind {
                FrameKind::Block => frame.name.clone(),
                FrameKind::Catch => frame.tag.clone(),
                _ => Value::Nil,
            };
            entries.push(BacktraceEntry {
                kind: frame.kind,
                detail,
            });
            cursor = frame.next();
        }
        entries
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("chain_head", &self.chain_head)
            .field("call_depth", &self.call_depth)
            .field("stack_len", &self.stack.len())
            .finish()
    }
}

/// One entry of a diagnostic backtrace
#[derive(Clone, Debug)]
pub struct BacktraceEntry {
    /// The frame's variant
    pub kind: FrameKind,
    /// The block name or catch tag, `Nil` for other variants
    pub detail: Value,
}

impl fmt::Display for BacktraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Value::Nil => write!(f, "[{}]", self.kind),
            detail => write!(f, "[{} {detail}]", self.kind),
        }
    }
}
