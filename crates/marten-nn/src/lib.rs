//! # marten-nn
//!
//! Recurrent layer library for Marten.
//!
//! Layers expose `parameters()` (a deterministic list of [`marten_core::Mat`]
//! handles for solvers and checkpointing), `activate(...)` (the forward
//! computation, recorded on the current thread's tape), and `shadow_copy()`
//! (a Hogwild worker copy sharing value buffers but owning fresh gradients).

pub mod init;
pub mod layer;
pub mod lstm;
pub mod rnn;

pub use layer::{Layer, StackedInputLayer};
pub use lstm::{forward_lstms, stacked_cells, Lstm, LstmState};
pub use rnn::{GatedInput, Rnn, ShortcutRnn};
