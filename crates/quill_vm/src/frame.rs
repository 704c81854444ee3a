use std::rc::Rc;

use quill_bytecode::CompiledUnit;
use quill_common::StackTraceElement;
use quill_runtime::{KeyEnumerator, ObjectRef, Value};
use smallvec::SmallVec;

use crate::fault::Fault;

// ---------------------------------------------------------------------------
// Frame locals
// ---------------------------------------------------------------------------

/// Contents of a frame local slot. Locals are never visible to script code.
#[derive(Debug, Clone, Default)]
pub enum LocalSlot {
    #[default]
    Empty,
    /// A caught exception value.
    Value(Value),
    /// Scope saved on `try` entry.
    Scope(ObjectRef),
    /// Where `RETSUB` resumes after a `finally` entered by `GOSUB`.
    ReturnAddress(usize),
    /// The fault a `finally` block re-raises when it completes.
    Pending(Box<Fault>),
    Enumerator(KeyEnumerator),
}

/// What the frame is waiting for from the callee it started.
#[derive(Debug, Clone, Default)]
pub enum PendingCall {
    #[default]
    None,
    Call,
    /// `new`: the receiver replaces a non-object result.
    Construct(ObjectRef),
}

// ---------------------------------------------------------------------------
// Call frame
// ---------------------------------------------------------------------------

/// One activation of a compiled unit.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub unit: Rc<CompiledUnit>,
    /// The function object being run; `None` for scripts.
    pub function: Option<ObjectRef>,
    /// Parameter and variable slots.
    pub vars: SmallVec<[Value; 8]>,
    pub locals: Vec<LocalSlot>,
    pub stack: Vec<Value>,
    /// Offset of the next instruction.
    pub pc: usize,
    pub scope: ObjectRef,
    /// Activation object when the unit keeps its variables on one.
    pub activation: Option<ObjectRef>,
    pub this: Value,
    /// Result register written by `POP_RESULT`.
    pub result: Value,
    pub pending: PendingCall,
    /// Script calls between this frame and the outermost invocation.
    pub depth: u32,
    pub frozen: bool,
    pub parent: Option<Frame>,
}

impl CallFrame {
    pub fn new(
        unit: Rc<CompiledUnit>,
        function: Option<ObjectRef>,
        scope: ObjectRef,
        this: Value,
        depth: u32,
    ) -> Self {
        let vars = std::iter::repeat(Value::Undefined)
            .take(unit.var_names.len())
            .collect();
        let locals = vec![LocalSlot::Empty; unit.max_locals as usize];
        let stack = Vec::with_capacity(unit.max_stack as usize);
        CallFrame {
            unit,
            function,
            vars,
            locals,
            stack,
            pc: 0,
            scope,
            activation: None,
            this,
            result: Value::Undefined,
            pending: PendingCall::None,
            depth,
            frozen: false,
            parent: None,
        }
    }

    pub fn parent_frame(&self) -> Option<&CallFrame> {
        self.parent.as_ref().map(Frame::get)
    }

    /// This frame and its callers, innermost first.
    pub fn chain(&self) -> impl Iterator<Item = &CallFrame> {
        std::iter::successors(Some(self), |f| f.parent_frame())
    }

    /// Line of the instruction that last ran in this frame.
    pub fn line(&self) -> u32 {
        self.unit.line_at(self.pc.saturating_sub(1))
    }

    pub fn trace_element(&self) -> StackTraceElement {
        StackTraceElement {
            file_name: self.unit.source_name.to_string(),
            function_name: self.unit.name.to_string(),
            line: self.line(),
        }
    }

    /// Mark this frame and every owned ancestor frozen, converting them to
    /// shared frames.
    ///
    /// This frame's pending call slot is cleared: a resume delivers its
    /// value straight onto the stack top. Ancestors keep theirs, since the
    /// callee they wait on still returns into them.
    pub fn freeze(mut self: Box<Self>) -> Rc<CallFrame> {
        self.pending = PendingCall::None;
        let mut owned = Vec::new();
        let mut next = self.parent.take();
        while let Some(Frame::Owned(mut frame)) = next {
            next = frame.parent.take();
            owned.push(frame);
        }
        // `next` is now the first already-shared ancestor, if any.
        let mut parent = next;
        for mut frame in owned.into_iter().rev() {
            frame.parent = parent;
            parent = Some(Frame::Shared(frame.seal()));
        }
        self.parent = parent;
        self.seal()
    }

    fn seal(mut self: Box<Self>) -> Rc<CallFrame> {
        self.frozen = true;
        self.stack.shrink_to_fit();
        Rc::new(*self)
    }
}

// ---------------------------------------------------------------------------
// Owned / shared frames
// ---------------------------------------------------------------------------

/// A parent link. Frames captured by a continuation are shared and
/// immutable; anything that would mutate one works on a copy.
#[derive(Debug, Clone)]
pub enum Frame {
    Owned(Box<CallFrame>),
    Shared(Rc<CallFrame>),
}

impl Frame {
    pub fn get(&self) -> &CallFrame {
        match self {
            Frame::Owned(frame) => frame,
            Frame::Shared(frame) => frame,
        }
    }

    /// Identity of the frame. An owned frame is never identical to a shared
    /// one.
    pub fn ptr(&self) -> *const CallFrame {
        match self {
            Frame::Owned(frame) => &**frame as *const CallFrame,
            Frame::Shared(frame) => Rc::as_ptr(frame),
        }
    }

    /// A mutable frame, taking the shared one over when nothing else holds
    /// it and copying it otherwise.
    pub fn into_owned(self) -> Box<CallFrame> {
        match self {
            Frame::Owned(frame) => frame,
            Frame::Shared(frame) => thaw(frame),
        }
    }
}

/// Unfrozen copy of a shared frame. Its parent link stays shared.
pub fn thaw(frame: Rc<CallFrame>) -> Box<CallFrame> {
    let mut owned = Rc::try_unwrap(frame).unwrap_or_else(|shared| (*shared).clone());
    owned.frozen = false;
    Box::new(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_bytecode::Environment;
    use quill_runtime::{GcPtr, JsObject};

    fn unit() -> Rc<CompiledUnit> {
        let program = quill_ast::build::program(vec![]);
        Rc::new(quill_bytecode::compile(&program, &Environment::default()).unwrap())
    }

    fn frame(depth: u32) -> Box<CallFrame> {
        let scope = GcPtr::new(JsObject::scope(None));
        Box::new(CallFrame::new(unit(), None, scope, Value::Undefined, depth))
    }

    fn chain_of(len: u32) -> Box<CallFrame> {
        let mut current = frame(0);
        for depth in 1..len {
            let mut child = frame(depth);
            child.parent = Some(Frame::Owned(current));
            current = child;
        }
        current
    }

    #[test]
    fn freeze_shares_every_ancestor() {
        let mut leaf = chain_of(3);
        leaf.stack.push(Value::Number(1.0));
        let frozen = leaf.freeze();

        assert!(frozen.chain().all(|f| f.frozen));
        assert_eq!(frozen.chain().count(), 3);
        assert!(frozen
            .chain()
            .skip(1)
            .all(|f| matches!(f.parent, None | Some(Frame::Shared(_)))));
        assert!(matches!(frozen.parent, Some(Frame::Shared(_))));
        assert_eq!(frozen.stack, vec![Value::Number(1.0)]);
    }

    #[test]
    fn freeze_clears_only_the_leaf_pending_call() {
        let mut leaf = chain_of(2);
        leaf.pending = PendingCall::Call;
        if let Some(Frame::Owned(parent)) = leaf.parent.as_mut() {
            parent.pending = PendingCall::Call;
        }
        let frozen = leaf.freeze();
        assert!(matches!(frozen.pending, PendingCall::None));
        let parent = frozen.parent_frame().unwrap();
        assert!(matches!(parent.pending, PendingCall::Call));
    }

    #[test]
    fn freezing_a_partly_shared_chain_keeps_shared_frames() {
        let root = chain_of(2).freeze();
        let mut leaf = frame(2);
        leaf.parent = Some(Frame::Shared(root.clone()));
        let frozen = leaf.freeze();
        let parent = frozen.parent.as_ref().unwrap();
        assert_eq!(parent.ptr(), Rc::as_ptr(&root));
    }

    #[test]
    fn into_owned_copies_when_shared_elsewhere() {
        let shared = chain_of(2).freeze();
        let keep = shared.clone();
        let mut owned = Frame::Shared(shared).into_owned();
        assert!(!owned.frozen);
        owned.pc = 42;
        assert_eq!(keep.pc, 0);
        assert!(keep.frozen);
        // The parent is still the same shared frame.
        assert_eq!(
            owned.parent.as_ref().unwrap().ptr(),
            keep.parent.as_ref().unwrap().ptr()
        );
    }

    #[test]
    fn trace_element_uses_unit_names() {
        let f = frame(0);
        let element = f.trace_element();
        assert_eq!(element.function_name, "");
        assert_eq!(element.file_name, "<script>");
    }
}
