//! # marten-core
//!
//! Core tensor primitives and reverse-mode autodiff for Marten.
//!
//! This crate provides:
//! - [`Array`] — strided n-dimensional view over device-synchronized memory
//! - [`SyncMemory`] — host/device buffer pair with freshness tracking
//! - [`MemoryBank`] — process-wide size-keyed free list of released buffers
//! - [`Device`] — host / accelerator / fake-device identification
//! - [`Mat`] — the differentiable (value, gradient) pair
//! - [`tape`] — per-thread backward tape with a scoped [`tape::NoBackprop`] guard
//! - the differentiable op library (`ops`) and its gradient rules

pub mod array;
pub mod backprop;
pub mod bank;
pub mod device;
pub mod dtype;
pub mod error;
pub mod mat;
pub mod memory;
pub mod op;
pub mod ops;
pub mod slice;
pub mod tape;

pub use array::Array;
pub use bank::{BankStats, MemoryBank};
pub use device::Device;
pub use dtype::{DType, FloatScalar, Scalar};
pub use error::{Error, Result};
pub use mat::Mat;
pub use memory::{should_compute_on, SyncMemory};
pub use op::BackwardEntry;
pub use ops::{cross_entropy, mul_add_mul_with_bias, mul_with_bias};
pub use slice::Slice;
pub use tape::NoBackprop;
