//! Non-local control transfer: the typed unwind signal and the construct
//! entry points that produce and consume it.
//!
//! A jump is initiated by walking the *live* chain (or tag chain) to find its
//! destination frame, then returning an [Unwind] signal through the normal
//! `Result` path. Every construct wrapper the signal passes through releases
//! its own frame; `unwind_protect` wrappers additionally run their cleanup,
//! which yields the required innermost-first cleanup order without any
//! central unwinding loop. The destination wrapper restores its frame's
//! snapshot and consumes the signal.

use crate::{
    Context, Error, ErrorKind, Value,
    frame::{FrameId, FrameKind, Tag, TagId},
};

/// A typed unwind signal naming its destination frame
///
/// Control errors travel as the [Error](Unwind::Error) variant: they are a
/// reserved non-local exit whose target is always reachable, the top level.
#[derive(Debug)]
pub enum Unwind {
    /// A `return-from` on its way to the named [Block](FrameKind::Block)
    Return {
        /// The destination block frame
        target: FrameId,
        /// The block's result value
        value: Value,
    },
    /// A `throw` on its way to the matching [Catch](FrameKind::Catch)
    Throw {
        /// The destination catch frame
        target: FrameId,
        /// The thrown value
        value: Value,
    },
    /// A `go` on its way to the owning [Tagbody](FrameKind::Tagbody)
    Go {
        /// The destination tagbody frame
        target: FrameId,
        /// The statement index to resume the body at
        index: usize,
    },
    /// A control error unwinding to the nearest recovery point
    Error(Error),
}

impl Unwind {
    /// Converts a signal that reached a recovery point into a control error
    ///
    /// A targeted signal arriving here means its destination's dynamic extent
    /// ended without consuming it, which is reported rather than silently
    /// followed.
    pub fn into_error(self) -> Error {
        match self {
            Self::Error(error) => error,
            Self::Return { .. } | Self::Throw { .. } | Self::Go { .. } => {
                ErrorKind::ExpiredTarget.into()
            }
        }
    }
}

impl From<Error> for Unwind {
    fn from(error: Error) -> Self {
        Self::Error(error)
    }
}

impl From<ErrorKind> for Unwind {
    fn from(kind: ErrorKind) -> Self {
        Self::Error(kind.into())
    }
}

/// The Result type threaded through construct bodies
pub type Flow<T> = std::result::Result<T, Unwind>;

impl Context {
    /// Runs `body` inside a named block that `return-from` can exit
    pub fn block(
        &mut self,
        name: Value,
        body: impl FnOnce(&mut Context) -> Flow<Value>,
    ) -> Flow<Value> {
        let id = self.push_frame(FrameKind::Block);
        self.pool.get_mut(id).name = name;
        match body(self) {
            Ok(value) => {
                self.pop_frame(id);
                Ok(value)
            }
            Err(Unwind::Return { target, value }) if target == id => {
                self.consume_target(id);
                Ok(value)
            }
            Err(unwind) => {
                self.pop_frame(id);
                Err(unwind)
            }
        }
    }

    /// Initiates a `return-from` targeting the innermost live block whose
    /// name matches
    ///
    /// Frames of other kinds along the way are skipped here; they get
    /// unwound (and their cleanups run) as the signal propagates outwards.
    pub fn return_from<T>(&mut self, name: &Value, value: Value) -> Flow<T> {
        let mut cursor = self.chain_head;
        while let Some(id) = cursor {
            let frame = self.pool.get(id);
            if frame.kind == FrameKind::Block && frame.name == *name {
                return Err(Unwind::Return { target: id, value });
            }
            cursor = frame.next();
        }
        Err(ErrorKind::UnmatchedReturn(name.clone()).into())
    }

    /// Runs `body` inside a catch point for the given tag value
    pub fn catch_value(
        &mut self,
        tag: Value,
        body: impl FnOnce(&mut Context) -> Flow<Value>,
    ) -> Flow<Value> {
        let id = self.push_frame(FrameKind::Catch);
        self.pool.get_mut(id).tag = tag;
        match body(self) {
            Ok(value) => {
                self.pop_frame(id);
                Ok(value)
            }
            Err(Unwind::Throw { target, value }) if target == id => {
                self.consume_target(id);
                Ok(value)
            }
            Err(unwind) => {
                self.pop_frame(id);
                Err(unwind)
            }
        }
    }

    /// Initiates a `throw` targeting the innermost live catch whose tag is
    /// equal to the thrown tag
    ///
    /// Tags are compared by runtime value equality, not by the lexical name
    /// used at the catch site.
    pub fn throw_value<T>(&mut self, tag: &Value, value: Value) -> Flow<T> {
        let mut cursor = self.chain_head;
        while let Some(id) = cursor {
            let frame = self.pool.get(id);
            if frame.kind == FrameKind::Catch && frame.tag == *tag {
                return Err(Unwind::Throw { target: id, value });
            }
            cursor = frame.next();
        }
        Err(ErrorKind::UnmatchedThrow(tag.clone()).into())
    }

    /// Runs a tagbody: statements indexed `0..statement_count`, with labeled
    /// re-entry points given as `(label, statement index)` pairs in
    /// declaration order
    ///
    /// A [Go](Unwind::Go) consumed here restores the tagbody's snapshot but
    /// keeps this frame as the chain head, since the construct isn't exiting,
    /// then resumes the statement loop at the tag's index. Labels registered
    /// here remain visible to `go` from any construct nested in the body, and
    /// enclosing tagbodies' labels stay reachable through the tag chain.
    pub fn tagbody(
        &mut self,
        labels: &[(Value, usize)],
        statement_count: usize,
        mut statement: impl FnMut(&mut Context, usize) -> Flow<()>,
    ) -> Flow<()> {
        let id = self.push_frame(FrameKind::Tagbody);
        let tags_start = self.tags.len();
        let outer_head = self.tag_head;

        // Link this body's tags in declaration order in front of the
        // enclosing chain
        let mut head = outer_head;
        for (name, index) in labels.iter().rev() {
            let tag_id = TagId(self.tags.len() as u32);
            self.tags.push(Tag {
                name: name.clone(),
                tagbody: id,
                index: *index,
                next: head,
            });
            head = Some(tag_id);
        }
        let body_head = head;
        self.tag_head = body_head;

        let mut pc = 0;
        let result = loop {
            if pc >= statement_count {
                break Ok(());
            }
            match statement(self, pc) {
                Ok(()) => pc += 1,
                Err(Unwind::Go { target, index }) if target == id => {
                    let snapshot = self.pool.get(id).snapshot.clone();
                    self.unbind_to(snapshot.bindings_mark);
                    self.protect_head = snapshot.protect_head;
                    self.stack.truncate(snapshot.stack_mark);
                    self.call_depth = snapshot.call_depth;
                    self.chain_head = Some(id);
                    self.tag_head = body_head;
                    pc = index;
                }
                Err(unwind) => break Err(unwind),
            }
        };

        self.tag_head = outer_head;
        self.tags.truncate(tags_start);
        self.pop_frame(id);
        result
    }

    /// Initiates a `go` targeting a label in the active tag chain
    ///
    /// The search spans the innermost tagbody and any lexically enclosing
    /// ones still live on the control chain.
    pub fn go<T>(&mut self, label: &Value) -> Flow<T> {
        let mut cursor = self.tag_head;
        while let Some(TagId(index)) = cursor {
            let tag = &self.tags[index as usize];
            if tag.name == *label {
                return Err(Unwind::Go {
                    target: tag.tagbody,
                    index: tag.index,
                });
            }
            cursor = tag.next;
        }
        Err(ErrorKind::UnmatchedGo(label.clone()).into())
    }

    /// Runs `body` with a cleanup that's guaranteed to run whenever control
    /// leaves it, normally or abruptly
    ///
    /// The frame is popped before the cleanup runs, so a non-local exit from
    /// the cleanup itself doesn't re-enter this construct. An exit initiated
    /// by the cleanup supersedes the one in flight.
    pub fn unwind_protect<T>(
        &mut self,
        body: impl FnOnce(&mut Context) -> Flow<T>,
        cleanup: impl FnOnce(&mut Context) -> Flow<()>,
    ) -> Flow<T> {
        let id = self.push_frame(FrameKind::UnwindProtect);
        let result = body(self);
        self.pop_frame(id);
        match result {
            Ok(value) => {
                cleanup(self)?;
                Ok(value)
            }
            Err(unwind) => match cleanup(self) {
                Ok(()) => Err(unwind),
                Err(cleanup_unwind) => Err(cleanup_unwind),
            },
        }
    }

    /// Runs `body` with a dynamic binding in effect for its extent
    ///
    /// The shadowed value is reinstated on normal exit; abrupt exits restore
    /// it through the destination frame's binding mark.
    pub fn with_binding<T>(
        &mut self,
        name: std::rc::Rc<str>,
        value: Value,
        body: impl FnOnce(&mut Context) -> Flow<T>,
    ) -> Flow<T> {
        let mark = self.bindings_mark();
        self.bind(name, value);
        let result = body(self);
        self.unbind_to(mark);
        result
    }

    /// Runs `body` as a new activation, failing fast with a control error if
    /// the call depth limit would be exceeded
    pub fn call<T>(&mut self, body: impl FnOnce(&mut Context) -> Flow<T>) -> Flow<T> {
        if self.call_depth >= self.call_depth_limit {
            return Err(ErrorKind::CallDepthExceeded {
                limit: self.call_depth_limit,
            }
            .into());
        }
        self.call_depth += 1;
        let result = body(self);
        self.call_depth = self.call_depth.saturating_sub(1);
        result
    }
}
