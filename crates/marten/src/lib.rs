//! # marten
//!
//! CPU-first automatic differentiation and tensor library for training
//! recurrent neural networks, with Hogwild-style parallel SGD on shared
//! parameters.
//!
//! The façade crate: re-exports the core tensor/autodiff machinery, the
//! layer library and solvers, and adds the [`model::StackedModel`]
//! composition, the [`hogwild`] parallel driver, dense-blob parameter
//! [`checkpoint`]ing, and text [`config`] maps.
//!
//! ```ignore
//! use marten::prelude::*;
//!
//! let model = StackedModel::<f32>::new(vocab, 5, vocab, vec![20, 20])?;
//! let master = model.parameters();
//! hogwild::run(5, |_worker| {
//!     let shadow = model.shadow_copy()?;
//!     let mut solver = AdaDelta::default();
//!     // ... forward, loss.grad(), tape::backward::<f32>(),
//!     //     solver.step(&shadow.parameters(), 0.0) ...
//!     Ok(())
//! })?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod hogwild;
pub mod model;

pub use marten_core::bail;
pub use marten_core::tape;
pub use marten_core::{
    cross_entropy, mul_add_mul_with_bias, mul_with_bias, should_compute_on, Array, BackwardEntry,
    DType, Device, Error, FloatScalar, Mat, MemoryBank, NoBackprop, Result, Scalar, Slice,
    SyncMemory,
};

pub use marten_nn as nn;
pub use marten_optim as optim;

/// The common imports for building and training models.
pub mod prelude {
    pub use crate::config::ConfigMap;
    pub use crate::hogwild;
    pub use crate::model::StackedModel;
    pub use marten_core::tape;
    pub use marten_core::{
        cross_entropy, mul_add_mul_with_bias, mul_with_bias, Array, Mat, NoBackprop, Result, Slice,
    };
    pub use marten_nn::{
        forward_lstms, stacked_cells, GatedInput, Layer, Lstm, LstmState, Rnn, ShortcutRnn,
        StackedInputLayer,
    };
    pub use marten_optim::{AdaDelta, RmsProp, Sgd, Solver};
}
