//! Capturing frame chains and finding where a resume rejoins the live chain.

use std::any::Any;
use std::rc::Rc;

use quill_runtime::{ContinuationData, GcPtr, JsObject, Value};
use tracing::debug;

use crate::fault::NativeFault;
use crate::frame::{thaw, CallFrame, Frame};

/// Freeze the chain ending at `frame`.
///
/// Returns the frame execution carries on in: an unfrozen copy of the
/// captured one, with the new continuation object pushed as the capture
/// call's result.
pub fn capture(frame: Box<CallFrame>) -> Box<CallFrame> {
    let depth = frame.depth;
    let shared = frame.freeze();
    let data = ContinuationData {
        frame: Some(shared.clone() as Rc<dyn Any>),
    };
    debug!(
        function = shared.unit.display_name(),
        depth, "continuation captured"
    );
    let mut live = thaw(shared);
    live.stack
        .push(Value::Object(GcPtr::new(JsObject::continuation(data))));
    live
}

/// The frame a continuation resumes into, if it captured one.
pub fn captured_frame(data: &ContinuationData) -> Option<Rc<CallFrame>> {
    data.frame
        .clone()
        .and_then(|frame| Rc::downcast::<CallFrame>(frame).ok())
}

/// The captured chain as shared frames, leaf first.
fn captured_chain(leaf: &Rc<CallFrame>) -> Result<Vec<Rc<CallFrame>>, NativeFault> {
    let mut chain = vec![leaf.clone()];
    let mut current = leaf.clone();
    loop {
        if !current.frozen {
            return Err(NativeFault::Invariant(format!(
                "captured frame '{}' is not frozen",
                current.unit.display_name()
            )));
        }
        let next = match &current.parent {
            None => break,
            Some(Frame::Shared(parent)) => parent.clone(),
            Some(Frame::Owned(_)) => {
                return Err(NativeFault::Invariant(
                    "captured chain links to an owned frame".into(),
                ))
            }
        };
        chain.push(next.clone());
        current = next;
    }
    Ok(chain)
}

/// Deepest frame that the live chain starting at `live` shares with the
/// captured chain ending at `target`.
///
/// Both chains are brought to the same length by skipping frames of the
/// longer one, then walked in lockstep until they meet. `None` means the
/// continuation is detached from the live chain.
pub fn branch_point(
    live: &CallFrame,
    target: &Rc<CallFrame>,
) -> Result<Option<Rc<CallFrame>>, NativeFault> {
    let captured = captured_chain(target)?;
    let live: Vec<*const CallFrame> = live.chain().map(|f| f as *const CallFrame).collect();

    let skip_live = live.len().saturating_sub(captured.len());
    let skip_captured = captured.len().saturating_sub(live.len());
    let found = live[skip_live..]
        .iter()
        .zip(&captured[skip_captured..])
        .find(|(live, captured)| **live == Rc::as_ptr(*captured))
        .map(|(_, captured)| captured.clone());
    Ok(found)
}

/// Captured frames below `branch`, outermost first: the frames a resume
/// re-enters.
pub fn reentry_path(
    target: &Rc<CallFrame>,
    branch: Option<&Rc<CallFrame>>,
) -> Result<Vec<Rc<CallFrame>>, NativeFault> {
    let stop = branch.map(Rc::as_ptr);
    let mut path: Vec<Rc<CallFrame>> = captured_chain(target)?
        .into_iter()
        .take_while(|f| Some(Rc::as_ptr(f)) != stop)
        .collect();
    path.reverse();
    Ok(path)
}
