//! # marten-optim
//!
//! Parameter-optimizing solvers for Marten.
//!
//! A solver consumes the gradients accumulated in each parameter's `dw`,
//! updates the shared `w` buffers, and zeroes every `dw` before returning.
//! Per-parameter accumulator state (squared-gradient caches and the like)
//! is keyed by [`marten_core::Mat::id`] and allocated lazily on the first
//! step that touches a parameter — which is also what makes the state
//! follow a parameter across Hogwild worker shadows, since `encapsulate`
//! preserves the master's id.
//!
//! Updates are deliberately unsynchronized with respect to other workers
//! ("Hogwild"): stale parameter reads are accepted by design.

pub mod adadelta;
pub mod rmsprop;
pub mod sgd;

use marten_core::{FloatScalar, Mat, Result};

pub use adadelta::AdaDelta;
pub use rmsprop::RmsProp;
pub use sgd::Sgd;

/// Common solver interface: consume gradients, update weights, zero
/// gradients. `l2` adds weight-decay pressure toward zero.
pub trait Solver<R: FloatScalar> {
    fn step(&mut self, params: &[Mat<R>], l2: R) -> Result<()>;
}

/// Clamp a gradient element to ±clip. Applied before any other solver
/// arithmetic.
pub(crate) fn clip_elem(g: f64, clip: f64) -> f64 {
    if clip > 0.0 {
        g.clamp(-clip, clip)
    } else {
        g
    }
}
