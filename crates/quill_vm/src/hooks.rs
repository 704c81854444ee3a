use quill_bytecode::CompiledUnit;
use quill_runtime::Value;

/// Observes frames entering and leaving.
///
/// `on_enter` is replayed for every captured frame a continuation re-enters,
/// root first.
pub trait DebugHook {
    fn on_enter(&mut self, unit: &CompiledUnit, depth: u32);

    /// A `LINE` instruction was reached.
    fn on_line(&mut self, _unit: &CompiledUnit, _line: u32) {}

    /// `result` is `None` when the frame is left by a fault.
    fn on_exit(&mut self, unit: &CompiledUnit, depth: u32, result: Option<&Value>);
}

/// Decides what happens when the instruction budget runs out.
pub trait InstructionObserver {
    /// Called at a backward branch or call once `executed` has reached the
    /// threshold. `Ok` resets the count and continues; `Err` interrupts the
    /// invocation with the given reason.
    fn budget_exhausted(&mut self, executed: u64) -> Result<(), String>;
}
