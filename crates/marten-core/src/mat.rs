use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::array::Array;
use crate::dtype::{FloatScalar, Scalar};
use crate::error::Result;

// Mat — The user-facing differentiable tensor
//
// A Mat is a 2-D pair (value `w`, gradient `dw`) behind a cheap-to-clone
// Arc handle. The convention throughout the layer library is columns are
// examples: a batch of N inputs of dimension D is a [D, N] Mat, a bias is
// [H, 1] broadcast across columns.
//
// `dw` exists from construction but owns no storage: its SyncMemory is
// created unallocated with clear-on-allocation set, so the gradient buffer
// materializes (zero-filled) only when a backward pass first touches it.
// Parameters that never receive gradient in a pass never pay for one.
//
// Identity is the `id` assigned from a global counter; solvers key their
// accumulators on it, and `encapsulate` (the Hogwild worker shadow: shared
// `w`, private `dw`) deliberately reuses the master's id so every worker's
// solver state lands in the same slot.

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

struct MatInner<R: Scalar> {
    id: u64,
    name: Mutex<Option<String>>,
    w: Array<R>,
    dw: Array<R>,
}

/// A named (value, gradient) pair of 2-D arrays.
pub struct Mat<R: Scalar> {
    inner: Arc<MatInner<R>>,
}

impl<R: Scalar> Clone for Mat<R> {
    fn clone(&self) -> Self {
        Mat {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Scalar> std::fmt::Debug for Mat<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Mat(id={}, shape=[{}, {}]{})",
            self.id(),
            self.rows(),
            self.cols(),
            match self.name() {
                Some(n) => format!(", name={:?}", n),
                None => String::new(),
            }
        )
    }
}

impl<R: Scalar> Mat<R> {
    fn from_parts(id: u64, w: Array<R>, dw: Array<R>) -> Self {
        Mat {
            inner: Arc::new(MatInner {
                id,
                name: Mutex::new(None),
                w,
                dw,
            }),
        }
    }

    fn fresh_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// A zero matrix of `rows × cols`. Neither side allocates until used.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let w = Array::zeros(&[rows, cols])?;
        let dw = Array::zeros(&[rows, cols])?;
        Ok(Self::from_parts(Self::fresh_id(), w, dw))
    }

    /// Uniform values in `[lo, hi)`.
    pub fn uniform(rows: usize, cols: usize, lo: f64, hi: f64) -> Result<Self> {
        let w = Array::uniform(&[rows, cols], lo, hi)?;
        let dw = Array::zeros(&[rows, cols])?;
        Ok(Self::from_parts(Self::fresh_id(), w, dw))
    }

    /// Build from a row-major value buffer.
    pub fn from_vec(rows: usize, cols: usize, values: Vec<R>) -> Result<Self> {
        let w = Array::from_vec(values, &[rows, cols])?;
        let dw = Array::zeros(&[rows, cols])?;
        Ok(Self::from_parts(Self::fresh_id(), w, dw))
    }

    /// Wrap an existing 2-D array as the value side.
    pub fn from_array(w: Array<R>) -> Result<Self> {
        let dw = Array::zeros(w.shape())?;
        Ok(Self::from_parts(Self::fresh_id(), w, dw))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().expect("mat name poisoned").clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.lock().expect("mat name poisoned") = Some(name.into());
    }

    pub fn w(&self) -> &Array<R> {
        &self.inner.w
    }

    pub fn dw(&self) -> &Array<R> {
        &self.inner.dw
    }

    pub fn rows(&self) -> usize {
        self.inner.w.shape()[0]
    }

    pub fn cols(&self) -> usize {
        self.inner.w.shape()[1]
    }

    pub fn shape(&self) -> &[usize] {
        self.inner.w.shape()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.w.elem_count()
    }

    /// Read one value.
    pub fn at(&self, row: usize, col: usize) -> Result<R> {
        self.inner.w.at(&[row, col])
    }

    /// Write one value.
    pub fn set(&self, row: usize, col: usize, v: R) -> Result<()> {
        self.inner.w.set_at(&[row, col], v)
    }

    /// Read one gradient value.
    pub fn dw_at(&self, row: usize, col: usize) -> Result<R> {
        self.inner.dw.at(&[row, col])
    }

    /// A new Mat whose `w` aliases this one's buffer and whose `dw` is a
    /// fresh lazy gradient. Keeps the master's id so per-parameter solver
    /// state is shared across workers.
    pub fn encapsulate(&self) -> Result<Self> {
        let dw = Array::zeros(self.inner.w.shape())?;
        Ok(Self::from_parts(self.inner.id, self.inner.w.clone(), dw))
    }

    /// Alias both `w` and `dw` under a new handle (and a new id).
    pub fn shallow_copy(&self) -> Self {
        Self::from_parts(Self::fresh_id(), self.inner.w.clone(), self.inner.dw.clone())
    }

    /// Copy the values into fresh storage; the gradient starts empty.
    pub fn deep_copy(&self) -> Result<Self> {
        let w = self.inner.w.deep_copy()?;
        let dw = Array::zeros(w.shape())?;
        Ok(Self::from_parts(Self::fresh_id(), w, dw))
    }

    /// Discard any accumulated gradient (deferred when unallocated).
    pub fn clear_grad(&self) -> Result<()> {
        self.inner.dw.memory().lazy_clear()
    }
}

impl<R: FloatScalar> Mat<R> {
    /// Seed the gradient: make sure `dw` is live and add 1 to every element.
    /// Call on the loss before `tape::backward()`.
    pub fn grad(&self) -> Result<()> {
        self.inner.dw.iadd_scalar(<R as Scalar>::one())
    }
}
