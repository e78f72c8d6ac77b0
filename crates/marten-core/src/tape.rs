use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use crate::dtype::FloatScalar;
use crate::error::Result;
use crate::op::BackwardEntry;

// Tape — The per-thread record of the forward computation
//
// Each differentiable op appends one BackwardEntry while the thread's
// recording flag is set. `backward()` drains the list strictly LIFO, which
// is a valid reverse topological order: an op's entry is always pushed
// after the entries that produced its inputs.
//
// Tapes are thread-local by construction. Hogwild workers therefore get
// independent tapes for free: each worker thread records and replays its
// own computation while sharing parameter value buffers with its peers.
// There is one tape slot per float element type, routed through
// `FloatScalar::with_tape`; the recording flag is a single per-thread
// boolean shared by all element types.

/// The ordered list of recorded backward steps for one thread.
pub struct Tape<R: FloatScalar> {
    entries: Vec<BackwardEntry<R>>,
}

impl<R: FloatScalar> Tape<R> {
    pub fn new() -> Self {
        Tape {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R: FloatScalar> Default for Tape<R> {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static TAPE_F32: RefCell<Tape<f32>> = RefCell::new(Tape::new());
    static TAPE_F64: RefCell<Tape<f64>> = RefCell::new(Tape::new());
    static RECORDING: Cell<bool> = const { Cell::new(true) };
}

impl FloatScalar for f32 {
    fn with_tape<T>(f: impl FnOnce(&RefCell<Tape<Self>>) -> T) -> T {
        TAPE_F32.with(f)
    }
}

impl FloatScalar for f64 {
    fn with_tape<T>(f: impl FnOnce(&RefCell<Tape<Self>>) -> T) -> T {
        TAPE_F64.with(f)
    }
}

/// Whether ops on this thread currently record backward entries.
pub fn is_recording() -> bool {
    RECORDING.with(|r| r.get())
}

/// Set the recording flag, returning its previous value.
pub fn set_recording(on: bool) -> bool {
    RECORDING.with(|r| r.replace(on))
}

/// Append an entry to this thread's tape if recording is enabled.
pub fn record<R: FloatScalar>(entry: BackwardEntry<R>) {
    if is_recording() {
        R::with_tape(|t| t.borrow_mut().entries.push(entry));
    }
}

/// Number of entries on this thread's tape.
pub fn size<R: FloatScalar>() -> usize {
    R::with_tape(|t| t.borrow().len())
}

/// Drop all recorded entries without running them. The recommended
/// recovery after an error inside `backward()`.
pub fn clear<R: FloatScalar>() {
    R::with_tape(|t| t.borrow_mut().entries.clear());
}

/// Replay this thread's tape in reverse insertion order, accumulating
/// gradients into every reachable Mat's `dw`, then leave the tape empty.
///
/// The entries are drained before any rule runs, so an error mid-replay
/// leaves the tape already cleared; callers restart the epoch.
pub fn backward<R: FloatScalar>() -> Result<()> {
    let entries = R::with_tape(|t| std::mem::take(&mut t.borrow_mut().entries));
    for entry in entries.into_iter().rev() {
        entry.apply()?;
    }
    Ok(())
}

/// Scope guard that disables recording for its lifetime.
///
/// Construction saves the current flag and clears it; drop restores the
/// saved value on every exit path, including panics. Not Send: the guard
/// must release on the thread whose flag it took.
pub struct NoBackprop {
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

impl NoBackprop {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        NoBackprop {
            prev: set_recording(false),
            _not_send: PhantomData,
        }
    }
}

impl Drop for NoBackprop {
    fn drop(&mut self) {
        set_recording(self.prev);
    }
}
