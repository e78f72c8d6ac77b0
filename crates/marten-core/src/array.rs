use std::sync::Arc;

use rand::Rng;

use crate::device::Device;
use crate::dtype::{FloatScalar, Scalar};
use crate::error::{Error, Result};
use crate::memory::SyncMemory;
use crate::slice::Slice;

// Array — A strided n-dimensional view over synchronized memory
//
// An Array is shape + strides + offset + a shared handle to a SyncMemory.
// View operations (pluck, slice, transpose, broadcast) never copy: they
// produce a new Array sharing the same memory with adjusted bookkeeping.
//
// REPRESENTATION CHOICES:
//
// 1. **Strides are optional.** A row-major contiguous array stores an empty
//    stride vector; effective strides are computed on demand. This keeps the
//    common case compact and doubles as a cheap contiguity test. View ops
//    that land back on the default layout re-compact their strides.
//
// 2. **Strides are signed.** Slicing with a negative step records a negative
//    stride and moves the view's offset to the last selected element.
//
// 3. **Broadcast is a mask, not just stride 0.** `broadcast_axis` marks a
//    size-1 axis; only marked axes may be grown by `reshape_broadcasted`,
//    which is the validation a stride-0-only encoding cannot express. A
//    grown axis gets stride 0 and loses its mask bit (its size is real now).

/// A strided view over a shared, device-synchronized buffer.
pub struct Array<R: Scalar> {
    shape: Vec<usize>,
    /// Empty means contiguous row-major over `shape`.
    strides: Vec<isize>,
    offset: usize,
    broadcast: Vec<bool>,
    memory: Arc<SyncMemory<R>>,
}

impl<R: Scalar> Clone for Array<R> {
    fn clone(&self) -> Self {
        Array {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
            broadcast: self.broadcast.clone(),
            memory: Arc::clone(&self.memory),
        }
    }
}

impl<R: Scalar> std::fmt::Debug for Array<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Array(shape={:?}, strides={:?}, offset={}, mem={:?})",
            self.shape, self.strides, self.offset, self.memory
        )
    }
}

/// Row-major strides for a shape.
fn contiguous_strides(shape: &[usize]) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    if !shape.is_empty() {
        strides[shape.len() - 1] = 1;
        for i in (0..shape.len() - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1] as isize;
        }
    }
    strides
}

// The empty product is 1, so a rank-0 shape holds one scalar; a shape with
// a zero-sized axis holds nothing and iterates nothing.
fn elem_count_of(shape: &[usize]) -> usize {
    shape.iter().product::<usize>()
}

impl<R: Scalar> Array<R> {
    // Factories

    fn with_new_memory(shape: Vec<usize>, device: Device, clear_on_allocation: bool) -> Result<Self> {
        let total = elem_count_of(&shape);
        let inner = shape.last().copied().unwrap_or(1).max(1);
        let rank = shape.len();
        Ok(Array {
            shape,
            strides: Vec::new(),
            offset: 0,
            broadcast: vec![false; rank],
            memory: Arc::new(SyncMemory::new(total, inner, device, clear_on_allocation)?),
        })
    }

    /// All zeros. Allocation is deferred; the buffer is zero-filled on
    /// first use.
    pub fn zeros(shape: &[usize]) -> Result<Self> {
        Self::zeros_on(shape, Device::Host)
    }

    pub fn zeros_on(shape: &[usize], device: Device) -> Result<Self> {
        Self::with_new_memory(shape.to_vec(), device, true)
    }

    /// All ones.
    pub fn ones(shape: &[usize]) -> Result<Self> {
        Self::fill(shape, R::one())
    }

    /// Every element set to `value`.
    pub fn fill(shape: &[usize], value: R) -> Result<Self> {
        let arr = Self::with_new_memory(shape.to_vec(), Device::Host, false)?;
        arr.memory.write_host(|buf| buf.fill(value))?;
        Ok(arr)
    }

    /// 0, 1, 2, … in row-major order.
    pub fn arange(shape: &[usize]) -> Result<Self> {
        let arr = Self::with_new_memory(shape.to_vec(), Device::Host, false)?;
        arr.memory.write_host(|buf| {
            for (i, v) in buf.iter_mut().enumerate() {
                *v = R::from_f64(i as f64);
            }
        })?;
        Ok(arr)
    }

    /// Uniform values in `[lo, hi)`.
    pub fn uniform(shape: &[usize], lo: f64, hi: f64) -> Result<Self> {
        let arr = Self::with_new_memory(shape.to_vec(), Device::Host, false)?;
        let mut rng = rand::thread_rng();
        arr.memory.write_host(|buf| {
            for v in buf.iter_mut() {
                *v = R::from_f64(rng.gen_range(lo..hi));
            }
        })?;
        Ok(arr)
    }

    /// Take ownership of a flat row-major buffer.
    pub fn from_vec(data: Vec<R>, shape: &[usize]) -> Result<Self> {
        if data.len() != elem_count_of(shape) {
            return Err(Error::ShapeMismatch {
                op: "from_vec",
                lhs: vec![data.len()],
                rhs: shape.to_vec(),
            });
        }
        let arr = Self::with_new_memory(shape.to_vec(), Device::Host, false)?;
        arr.memory.write_host(|buf| buf.copy_from_slice(&data))?;
        Ok(arr)
    }

    // Accessors

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn elem_count(&self) -> usize {
        elem_count_of(&self.shape)
    }

    /// The recorded strides. Empty means contiguous row-major.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn broadcast_mask(&self) -> &[bool] {
        &self.broadcast
    }

    pub fn memory(&self) -> &Arc<SyncMemory<R>> {
        &self.memory
    }

    pub fn device(&self) -> Device {
        self.memory.preferred_device()
    }

    /// Contiguous row-major layout (the empty-strides signal).
    pub fn is_contiguous(&self) -> bool {
        self.strides.is_empty()
    }

    pub fn shares_memory(&self, other: &Array<R>) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
    }

    /// Strides usable for address arithmetic: recorded ones, or row-major
    /// defaults when none are recorded, with 0 on broadcast axes.
    pub fn effective_strides(&self) -> Vec<isize> {
        let mut strides = if self.strides.is_empty() {
            contiguous_strides(&self.shape)
        } else {
            self.strides.clone()
        };
        for (s, &b) in strides.iter_mut().zip(self.broadcast.iter()) {
            if b {
                *s = 0;
            }
        }
        strides
    }

    /// Drop the stride vector when it matches the row-major default.
    /// Size-1 axes never move the cursor, so their strides are ignored.
    fn compacted(mut self) -> Self {
        if self.strides.is_empty() {
            return self;
        }
        let defaults = contiguous_strides(&self.shape);
        let matches = self
            .shape
            .iter()
            .zip(self.strides.iter().zip(defaults.iter()))
            .all(|(&dim, (&s, &d))| dim <= 1 || s == d);
        if matches {
            self.strides.clear();
        }
        self
    }

    /// Ensure every reachable strided address stays inside the buffer.
    fn validated(self, op: &'static str) -> Result<Self> {
        let strides = self.effective_strides();
        let mut lo = self.offset as isize;
        let mut hi = self.offset as isize;
        for (&dim, &s) in self.shape.iter().zip(strides.iter()) {
            if dim == 0 {
                return Err(Error::OutOfRange {
                    op,
                    axis: 0,
                    index: 0,
                    bound: 0,
                });
            }
            let span = (dim as isize - 1) * s;
            if span >= 0 {
                hi += span;
            } else {
                lo += span;
            }
        }
        if lo < 0 || hi >= self.memory.total_elems() as isize {
            return Err(Error::InvariantViolated(format!(
                "{}: view reaches [{}, {}] outside buffer of {} elements",
                op,
                lo,
                hi,
                self.memory.total_elems()
            )));
        }
        Ok(self)
    }

    // View operations

    /// Index one axis, producing a view of rank one lower.
    pub fn pluck_axis(&self, axis: usize, index: usize) -> Result<Self> {
        if axis >= self.rank() {
            return Err(Error::OutOfRange {
                op: "pluck_axis",
                axis,
                index: index as isize,
                bound: self.rank(),
            });
        }
        if index >= self.shape[axis] {
            return Err(Error::OutOfRange {
                op: "pluck_axis",
                axis,
                index: index as isize,
                bound: self.shape[axis],
            });
        }

        let mut shape = self.shape.clone();
        let mut mask = self.broadcast.clone();
        shape.remove(axis);
        mask.remove(axis);

        // Fast path: leading-axis pluck on a contiguous array stays
        // contiguous; the offset jumps whole sub-tensors.
        if self.strides.is_empty() && axis == 0 {
            let sub: usize = self.shape[1..].iter().product();
            return Array {
                shape,
                strides: Vec::new(),
                offset: self.offset + index * sub,
                broadcast: mask,
                memory: Arc::clone(&self.memory),
            }
            .validated("pluck_axis");
        }

        let eff = self.effective_strides();
        let offset = self.offset as isize + index as isize * eff[axis];
        if offset < 0 {
            return Err(Error::OutOfRange {
                op: "pluck_axis",
                axis,
                index: index as isize,
                bound: self.memory.total_elems(),
            });
        }
        let mut strides = eff;
        strides.remove(axis);
        Array {
            shape,
            strides,
            offset: offset as usize,
            broadcast: mask,
            memory: Arc::clone(&self.memory),
        }
        .compacted()
        .validated("pluck_axis")
    }

    /// Restrict one axis to a begin/end/step range.
    pub fn slice(&self, axis: usize, s: Slice) -> Result<Self> {
        if axis >= self.rank() {
            return Err(Error::OutOfRange {
                op: "slice",
                axis,
                index: 0,
                bound: self.rank(),
            });
        }
        if s.step == 0 {
            return Err(Error::msg("slice step cannot be 0"));
        }
        let dim = self.shape[axis];
        let (begin, end) = s.normalize(dim)?;
        let span = end - begin;
        let size = span.div_ceil(s.step.unsigned_abs());

        let eff = self.effective_strides();
        // A positive step starts at `begin`; a negative step starts at the
        // last selected element and walks down.
        let anchor = if s.step > 0 { begin } else { end - 1 };
        let offset = self.offset as isize + anchor as isize * eff[axis];
        if offset < 0 {
            return Err(Error::OutOfRange {
                op: "slice",
                axis,
                index: anchor as isize,
                bound: self.memory.total_elems(),
            });
        }

        let mut shape = self.shape.clone();
        shape[axis] = size;
        let mut strides = eff;
        strides[axis] *= s.step;
        Array {
            shape,
            strides,
            offset: offset as usize,
            broadcast: self.broadcast.clone(),
            memory: Arc::clone(&self.memory),
        }
        .compacted()
        .validated("slice")
    }

    /// Reverse all axes.
    pub fn transpose(&self) -> Result<Self> {
        let perm: Vec<usize> = (0..self.rank()).rev().collect();
        self.transpose_with(&perm)
    }

    /// Permute axes with an explicit permutation.
    pub fn transpose_with(&self, perm: &[usize]) -> Result<Self> {
        if perm.len() != self.rank() {
            return Err(Error::ShapeMismatch {
                op: "transpose",
                lhs: self.shape.clone(),
                rhs: perm.to_vec(),
            });
        }
        let mut seen = vec![false; self.rank()];
        for &p in perm {
            if p >= self.rank() || seen[p] {
                return Err(Error::OutOfRange {
                    op: "transpose",
                    axis: p,
                    index: p as isize,
                    bound: self.rank(),
                });
            }
            seen[p] = true;
        }
        let eff = self.effective_strides();
        let shape: Vec<usize> = perm.iter().map(|&p| self.shape[p]).collect();
        let strides: Vec<isize> = perm.iter().map(|&p| eff[p]).collect();
        let mask: Vec<bool> = perm.iter().map(|&p| self.broadcast[p]).collect();
        Ok(Array {
            shape,
            strides,
            offset: self.offset,
            broadcast: mask,
            memory: Arc::clone(&self.memory),
        }
        .compacted())
    }

    /// Insert a size-1 axis at position `axis`.
    pub fn expand_dims(&self, axis: usize) -> Result<Self> {
        if axis > self.rank() {
            return Err(Error::OutOfRange {
                op: "expand_dims",
                axis,
                index: axis as isize,
                bound: self.rank() + 1,
            });
        }
        let mut shape = self.shape.clone();
        let mut mask = self.broadcast.clone();
        shape.insert(axis, 1);
        mask.insert(axis, false);
        let strides = if self.strides.is_empty() {
            Vec::new()
        } else {
            let mut s = self.strides.clone();
            // a size-1 axis never moves the cursor; any value works
            s.insert(axis, if axis < self.strides.len() { self.strides[axis] } else { 1 });
            s
        };
        Ok(Array {
            shape,
            strides,
            offset: self.offset,
            broadcast: mask,
            memory: Arc::clone(&self.memory),
        }
        .compacted())
    }

    /// Mark a size-1 axis as broadcastable.
    pub fn broadcast_axis(&self, axis: usize) -> Result<Self> {
        if axis >= self.rank() {
            return Err(Error::OutOfRange {
                op: "broadcast_axis",
                axis,
                index: axis as isize,
                bound: self.rank(),
            });
        }
        if self.shape[axis] != 1 {
            return Err(Error::InvalidBroadcast {
                axis,
                from: self.shape[axis],
                to: 1,
            });
        }
        let mut out = self.clone();
        out.broadcast[axis] = true;
        Ok(out)
    }

    /// Grow broadcast axes to real sizes. Every axis must either keep its
    /// current size or be a marked size-1 axis growing to the target; a
    /// grown axis gets stride 0 and stops being broadcastable.
    pub fn reshape_broadcasted(&self, new_shape: &[usize]) -> Result<Self> {
        if new_shape.len() != self.rank() {
            return Err(Error::ShapeMismatch {
                op: "reshape_broadcasted",
                lhs: self.shape.clone(),
                rhs: new_shape.to_vec(),
            });
        }
        let mut out = self.clone();
        let mut grew = false;
        for (axis, (&cur, &new)) in self.shape.iter().zip(new_shape.iter()).enumerate() {
            if cur == new {
                continue;
            }
            if !(self.broadcast[axis] && cur == 1 && new > 1) {
                return Err(Error::InvalidBroadcast {
                    axis,
                    from: cur,
                    to: new,
                });
            }
            if !grew {
                out.strides = out.effective_strides();
                grew = true;
            }
            out.shape[axis] = new;
            out.strides[axis] = 0;
            out.broadcast[axis] = false;
        }
        Ok(out)
    }

    /// Collapse the shape to `rank` dims for a compute kernel:
    /// 1 flattens everything, 2 splits off the trailing dim, 3 keeps the
    /// leading and trailing dims, 4 pads (or folds) the front.
    pub fn canonical_shape(&self, rank: usize) -> Result<Vec<usize>> {
        let n = self.rank();
        let dims = &self.shape;
        Ok(match rank {
            1 => vec![self.elem_count()],
            2 => {
                let last = dims.last().copied().unwrap_or(1);
                vec![self.elem_count() / last.max(1), last]
            }
            3 => match n {
                0 => vec![1, 1, 1],
                1 => vec![1, 1, dims[0]],
                2 => vec![dims[0], 1, dims[1]],
                _ => vec![
                    dims[0],
                    dims[1..n - 1].iter().product(),
                    dims[n - 1],
                ],
            },
            4 => {
                if n <= 4 {
                    let mut out = vec![1; 4 - n];
                    out.extend_from_slice(dims);
                    out
                } else {
                    let mut out = vec![dims[..n - 3].iter().product::<usize>()];
                    out.extend_from_slice(&dims[n - 3..]);
                    out
                }
            }
            _ => {
                return Err(Error::msg(format!(
                    "canonical_shape supports ranks 1-4, got {}",
                    rank
                )))
            }
        })
    }

    /// A contiguous copy holding this view's logical values. Axes that are
    /// still broadcastable size-1 keep their mask.
    pub fn deep_copy(&self) -> Result<Self> {
        let values = self.to_vec()?;
        let out = Self::from_vec(values, &self.shape)?;
        let mut out = out;
        for (axis, &b) in self.broadcast.iter().enumerate() {
            if b && self.shape[axis] == 1 {
                out.broadcast[axis] = true;
            }
        }
        Ok(out)
    }

    // Element access

    fn flat_index(&self, idx: &[usize]) -> Result<usize> {
        if idx.len() != self.rank() {
            return Err(Error::ShapeMismatch {
                op: "at",
                lhs: self.shape.clone(),
                rhs: idx.to_vec(),
            });
        }
        let strides = self.effective_strides();
        let mut flat = self.offset as isize;
        for (axis, (&i, &dim)) in idx.iter().zip(self.shape.iter()).enumerate() {
            if i >= dim {
                return Err(Error::OutOfRange {
                    op: "at",
                    axis,
                    index: i as isize,
                    bound: dim,
                });
            }
            flat += i as isize * strides[axis];
        }
        Ok(flat as usize)
    }

    /// Read one element by multi-dimensional index.
    pub fn at(&self, idx: &[usize]) -> Result<R> {
        let flat = self.flat_index(idx)?;
        self.memory.read_host(|buf| buf[flat])
    }

    /// Write one element by multi-dimensional index.
    pub fn set_at(&self, idx: &[usize], value: R) -> Result<()> {
        let flat = self.flat_index(idx)?;
        self.memory.write_host(|buf| buf[flat] = value)
    }

    /// Read the `i`-th element in logical row-major order (strided walk).
    pub fn at_flat(&self, i: usize) -> Result<R> {
        if i >= self.elem_count() {
            return Err(Error::OutOfRange {
                op: "at_flat",
                axis: 0,
                index: i as isize,
                bound: self.elem_count(),
            });
        }
        let flat = self
            .indices()
            .nth(i)
            .expect("index within elem_count");
        self.memory.read_host(|buf| buf[flat])
    }

    /// Iterator over buffer addresses of this view's elements, in logical
    /// row-major order.
    pub fn indices(&self) -> StridedIter {
        StridedIter::new(&self.shape, self.effective_strides(), self.offset)
    }

    /// Copy out the logical contents, row-major.
    pub fn to_vec(&self) -> Result<Vec<R>> {
        let iter = self.indices();
        self.memory.read_host(|buf| iter.map(|i| buf[i]).collect())
    }

    /// Overwrite the logical contents from a row-major slice.
    pub fn write_values(&self, values: &[R]) -> Result<()> {
        if values.len() != self.elem_count() {
            return Err(Error::ShapeMismatch {
                op: "write_values",
                lhs: self.shape.clone(),
                rhs: vec![values.len()],
            });
        }
        let iter = self.indices();
        self.memory.write_host(|buf| {
            for (dst, &v) in iter.zip(values.iter()) {
                buf[dst] = v;
            }
        })
    }

    /// Apply `f` to every element in place.
    pub fn update(&self, mut f: impl FnMut(R) -> R) -> Result<()> {
        let iter = self.indices();
        self.memory.write_host(|buf| {
            for i in iter {
                buf[i] = f(buf[i]);
            }
        })
    }

    /// Set every element to `value`.
    pub fn fill_with(&self, value: R) -> Result<()> {
        self.update(|_| value)
    }

    /// Strides that read `rhs` broadcast against this array's shape: axes
    /// where `rhs` has size 1 and this array is wider get stride 0.
    fn rhs_broadcast_strides(&self, op: &'static str, rhs: &Array<R>) -> Result<Vec<isize>> {
        if rhs.rank() != self.rank() {
            return Err(Error::ShapeMismatch {
                op,
                lhs: self.shape.clone(),
                rhs: rhs.shape.clone(),
            });
        }
        let mut strides = rhs.effective_strides();
        for (axis, (&ld, &rd)) in self.shape.iter().zip(rhs.shape.iter()).enumerate() {
            if rd == ld {
                continue;
            }
            if rd == 1 {
                strides[axis] = 0;
            } else {
                return Err(Error::ShapeMismatch {
                    op,
                    lhs: self.shape.clone(),
                    rhs: rhs.shape.clone(),
                });
            }
        }
        Ok(strides)
    }

    /// Combine `rhs` into this array element-wise:
    /// `self[i] = f(self[i], rhs[i])`, with `rhs` broadcast where its axes
    /// have size 1. The right-hand side is copied out first so that views
    /// over the same buffer behave as if read in full before any write.
    pub fn zip_update(&self, op: &'static str, rhs: &Array<R>, f: impl Fn(R, R) -> R) -> Result<()> {
        let rhs_strides = self.rhs_broadcast_strides(op, rhs)?;
        let rhs_iter = StridedIter::new(&self.shape, rhs_strides, rhs.offset);
        let rhs_values: Vec<R> = rhs.memory.read_host(|buf| rhs_iter.map(|i| buf[i]).collect())?;
        let iter = self.indices();
        self.memory.write_host(|buf| {
            for (dst, rv) in iter.zip(rhs_values.into_iter()) {
                buf[dst] = f(buf[dst], rv);
            }
        })
    }

    // Reductions (flat and per-axis)

    fn fold<T>(&self, init: T, f: impl Fn(T, R, usize) -> T) -> Result<T> {
        let iter = self.indices();
        self.memory.read_host(|buf| {
            let mut acc = init;
            for (logical, flat) in iter.enumerate() {
                acc = f(acc, buf[flat], logical);
            }
            acc
        })
    }

    pub fn sum(&self) -> Result<R> {
        self.fold(R::zero(), |acc, v, _| R::from_f64(acc.to_f64() + v.to_f64()))
    }

    pub fn min(&self) -> Result<R> {
        self.fold(None, |acc: Option<R>, v, _| {
            Some(match acc {
                Some(m) if m < v => m,
                _ => v,
            })
        })?
        .ok_or_else(|| Error::msg("min of empty array"))
    }

    pub fn max(&self) -> Result<R> {
        self.fold(None, |acc: Option<R>, v, _| {
            Some(match acc {
                Some(m) if m > v => m,
                _ => v,
            })
        })?
        .ok_or_else(|| Error::msg("max of empty array"))
    }

    /// Logical index of the smallest element.
    pub fn argmin(&self) -> Result<usize> {
        self.fold(None, |acc: Option<(usize, R)>, v, i| {
            Some(match acc {
                Some((bi, bv)) if bv <= v => (bi, bv),
                _ => (i, v),
            })
        })?
        .map(|(i, _)| i)
        .ok_or_else(|| Error::msg("argmin of empty array"))
    }

    /// Logical index of the largest element.
    pub fn argmax(&self) -> Result<usize> {
        self.fold(None, |acc: Option<(usize, R)>, v, i| {
            Some(match acc {
                Some((bi, bv)) if bv >= v => (bi, bv),
                _ => (i, v),
            })
        })?
        .map(|(i, _)| i)
        .ok_or_else(|| Error::msg("argmax of empty array"))
    }

    fn axis_reduce<T: Copy>(
        &self,
        op: &'static str,
        axis: usize,
        init: T,
        f: impl Fn(T, R, usize) -> T,
    ) -> Result<Vec<T>> {
        if axis >= self.rank() {
            return Err(Error::OutOfRange {
                op,
                axis,
                index: axis as isize,
                bound: self.rank(),
            });
        }
        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        let out_count = elem_count_of(&out_shape);
        let mut acc = vec![init; out_count];

        // logical index -> output bucket: drop the reduced axis
        let outer: usize = self.shape[..axis].iter().product();
        let dim = self.shape[axis];
        let inner: usize = self.shape[axis + 1..].iter().product();
        let iter = self.indices();
        self.memory.read_host(|buf| {
            for (logical, flat) in iter.enumerate() {
                let o = logical / (dim * inner);
                let d = (logical / inner) % dim;
                let i = logical % inner;
                debug_assert!(o < outer.max(1));
                let bucket = o * inner + i;
                acc[bucket] = f(acc[bucket], buf[flat], d);
            }
        })?;
        Ok(acc)
    }

    /// Sum along one axis, producing an array of rank one lower.
    pub fn sum_axis(&self, axis: usize) -> Result<Array<R>> {
        let acc = self.axis_reduce("sum_axis", axis, R::zero(), |a, v, _| {
            R::from_f64(a.to_f64() + v.to_f64())
        })?;
        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        Array::from_vec(acc, &out_shape)
    }

    pub fn max_axis(&self, axis: usize) -> Result<Array<R>> {
        let acc = self.axis_reduce("max_axis", axis, None, |a: Option<R>, v, _| {
            Some(match a {
                Some(m) if m > v => m,
                _ => v,
            })
        })?;
        let vals: Vec<R> = acc
            .into_iter()
            .map(|o| o.ok_or_else(|| Error::msg(format!("max_axis: axis {} is empty", axis))))
            .collect::<Result<_>>()?;
        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        Array::from_vec(vals, &out_shape)
    }

    pub fn min_axis(&self, axis: usize) -> Result<Array<R>> {
        let acc = self.axis_reduce("min_axis", axis, None, |a: Option<R>, v, _| {
            Some(match a {
                Some(m) if m < v => m,
                _ => v,
            })
        })?;
        let vals: Vec<R> = acc
            .into_iter()
            .map(|o| o.ok_or_else(|| Error::msg(format!("min_axis: axis {} is empty", axis))))
            .collect::<Result<_>>()?;
        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        Array::from_vec(vals, &out_shape)
    }

    /// Per-slot index of the largest element along `axis`.
    pub fn argmax_axis(&self, axis: usize) -> Result<Array<i32>> {
        let acc = self.axis_reduce("argmax_axis", axis, None, |a: Option<(usize, R)>, v, d| {
            Some(match a {
                Some((bi, bv)) if bv >= v => (bi, bv),
                _ => (d, v),
            })
        })?;
        let vals: Vec<i32> = acc
            .into_iter()
            .map(|o| {
                o.map(|(d, _)| d as i32)
                    .ok_or_else(|| Error::msg(format!("argmax_axis: axis {} is empty", axis)))
            })
            .collect::<Result<_>>()?;
        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        Array::from_vec(vals, &out_shape)
    }

    /// Per-slot index of the smallest element along `axis`.
    pub fn argmin_axis(&self, axis: usize) -> Result<Array<i32>> {
        let acc = self.axis_reduce("argmin_axis", axis, None, |a: Option<(usize, R)>, v, d| {
            Some(match a {
                Some((bi, bv)) if bv <= v => (bi, bv),
                _ => (d, v),
            })
        })?;
        let vals: Vec<i32> = acc
            .into_iter()
            .map(|o| {
                o.map(|(d, _)| d as i32)
                    .ok_or_else(|| Error::msg(format!("argmin_axis: axis {} is empty", axis)))
            })
            .collect::<Result<_>>()?;
        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        Array::from_vec(vals, &out_shape)
    }

    // In-place arithmetic

    pub fn iadd_scalar(&self, v: R) -> Result<()> {
        self.update(|a| R::from_f64(a.to_f64() + v.to_f64()))
    }

    pub fn isub_scalar(&self, v: R) -> Result<()> {
        self.update(|a| R::from_f64(a.to_f64() - v.to_f64()))
    }

    pub fn imul_scalar(&self, v: R) -> Result<()> {
        self.update(|a| R::from_f64(a.to_f64() * v.to_f64()))
    }

    pub fn idiv_scalar(&self, v: R) -> Result<()> {
        self.update(|a| R::from_f64(a.to_f64() / v.to_f64()))
    }

    pub fn iadd(&self, rhs: &Array<R>) -> Result<()> {
        self.zip_update("iadd", rhs, |a, b| R::from_f64(a.to_f64() + b.to_f64()))
    }

    pub fn isub(&self, rhs: &Array<R>) -> Result<()> {
        self.zip_update("isub", rhs, |a, b| R::from_f64(a.to_f64() - b.to_f64()))
    }

    pub fn imul(&self, rhs: &Array<R>) -> Result<()> {
        self.zip_update("imul", rhs, |a, b| R::from_f64(a.to_f64() * b.to_f64()))
    }

    pub fn idiv(&self, rhs: &Array<R>) -> Result<()> {
        self.zip_update("idiv", rhs, |a, b| R::from_f64(a.to_f64() / b.to_f64()))
    }
}

impl<R: FloatScalar> Array<R> {
    /// Arithmetic mean of all elements.
    pub fn mean(&self) -> Result<R> {
        let n = self.elem_count();
        let total = self.sum()?;
        Ok(total / R::from_f64(n as f64))
    }

    /// Arithmetic mean along one axis: the axis sum divided by its size.
    pub fn mean_axis(&self, axis: usize) -> Result<Array<R>> {
        let total = self.sum_axis(axis)?;
        let n = self.shape[axis];
        if n == 0 {
            return Err(Error::msg(format!("mean_axis: axis {} is empty", axis)));
        }
        total.idiv_scalar(R::from_f64(n as f64))?;
        Ok(total)
    }
}

// StridedIter — Walks a view's elements in logical row-major order,
// yielding the flat buffer address of each. A contiguous view counts
// 0, 1, 2, …; a transposed or negatively-strided view jumps around.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<isize>,
    offset: isize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(dims: &[usize], strides: Vec<isize>, offset: usize) -> Self {
        StridedIter {
            current: vec![0; dims.len()],
            dims: dims.to_vec(),
            strides,
            offset: offset as isize,
            remaining: elem_count_of(dims),
            started: false,
        }
    }

    fn flat_index(&self) -> usize {
        let mut idx = self.offset;
        for i in 0..self.current.len() {
            idx += self.current[i] as isize * self.strides[i];
        }
        idx as usize
    }

    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat_index())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}

#[cfg(test)]
mod tests {
    use super::*;

    // [[[ 0  1  2  3], [ 4  5  6  7], [ 8  9 10 11]],
    //  [[12 13 14 15], [16 17 18 19], [20 21 22 23]]]
    fn build_234_arange() -> Array<i32> {
        Array::arange(&[2, 3, 4]).unwrap()
    }

    #[test]
    fn contiguous_defaults() {
        let x = build_234_arange();
        assert!(x.is_contiguous());
        assert_eq!(x.effective_strides(), vec![12, 4, 1]);
        assert_eq!(x.elem_count(), 24);
    }

    #[test]
    fn scalar_assign() {
        let x = Array::<i32>::zeros(&[3, 2]).unwrap();
        x.fill_with(13).unwrap();
        for i in 0..6 {
            assert_eq!(x.at_flat(i).unwrap(), 13);
        }
    }

    #[test]
    fn inplace_addition() {
        let x = Array::<i32>::zeros(&[3, 2]).unwrap();
        x.fill_with(13).unwrap();
        x.iadd_scalar(2).unwrap();
        assert_eq!(x.sum().unwrap(), 13 * 6 + 2 * 6);

        let before = Arc::as_ptr(x.memory());
        x.iadd(&Array::arange(&[3, 2]).unwrap()).unwrap();
        assert_eq!(Arc::as_ptr(x.memory()), before);
        for i in 0..6 {
            assert_eq!(x.at_flat(i).unwrap(), (13 + 2) + i as i32);
        }
    }

    #[test]
    fn inplace_multiplication() {
        let x = Array::<i32>::zeros(&[3, 2]).unwrap();
        x.fill_with(13).unwrap();
        x.imul_scalar(2).unwrap();
        assert_eq!(x.sum().unwrap(), 13 * 6 * 2);
        x.imul(&Array::arange(&[3, 2]).unwrap()).unwrap();
        for i in 0..6 {
            assert_eq!(x.at_flat(i).unwrap(), (13 * 2) * i as i32);
        }
    }

    #[test]
    fn pluck_axis_stride_shape() {
        let x = build_234_arange();

        let p0 = x.pluck_axis(0, 1).unwrap();
        assert_eq!(p0.shape(), &[3, 4]);
        assert_eq!(p0.elem_count(), 12);
        assert_eq!(p0.offset(), 12);
        // all-default strides collapse to the empty vector
        assert_eq!(p0.strides(), &[] as &[isize]);

        let p1 = x.pluck_axis(1, 2).unwrap();
        assert_eq!(p1.shape(), &[2, 4]);
        assert_eq!(p1.elem_count(), 8);
        assert_eq!(p1.offset(), 8);
        assert_eq!(p1.strides(), &[12, 1]);

        let p2 = x.pluck_axis(2, 1).unwrap();
        assert_eq!(p2.shape(), &[2, 3]);
        assert_eq!(p2.elem_count(), 6);
        assert_eq!(p2.offset(), 1);
        assert_eq!(p2.strides(), &[12, 4]);
    }

    #[test]
    fn pluck_axis_eval() {
        let x = build_234_arange();

        let p0 = x.pluck_axis(0, 0).unwrap();
        assert!(p0.shares_memory(&x));
        assert_eq!(p0.sum().unwrap(), (0..12).sum::<i32>());

        let p1 = x.pluck_axis(1, 2).unwrap();
        assert!(p1.shares_memory(&x));
        assert!(!p1.is_contiguous());
        assert_eq!(p1.sum().unwrap(), 8 + 9 + 10 + 11 + 20 + 21 + 22 + 23);

        let p2 = x.pluck_axis(2, 1).unwrap();
        assert!(p2.shares_memory(&x));
        assert!(!p2.is_contiguous());
        assert_eq!(p2.sum().unwrap(), 1 + 5 + 9 + 13 + 17 + 21);
    }

    #[test]
    fn inplace_strided_addition() {
        let x = build_234_arange();
        let view = x.pluck_axis(2, 1).unwrap();
        assert!(view.shares_memory(&x));
        view.iadd_scalar(1).unwrap();
        assert_eq!(
            view.sum().unwrap(),
            view.elem_count() as i32 + (1 + 5 + 9 + 13 + 17 + 21)
        );
    }

    #[test]
    fn slice_write_through() {
        let x = Array::<i32>::arange(&[6]).unwrap();
        let view = x.slice(0, Slice::with_step(1, 6, 2).unwrap()).unwrap();
        assert_eq!(view.to_vec().unwrap(), vec![1, 3, 5]);
        view.set_at(&[1], 100).unwrap();
        assert_eq!(x.at(&[3]).unwrap(), 100);
    }

    #[test]
    fn proper_slicing() {
        let x = build_234_arange();
        let sliced = x
            .slice(0, Slice::new(0, -1))
            .unwrap()
            .pluck_axis(1, 2)
            .unwrap()
            .slice(1, Slice::with_step(0, 4, -2).unwrap())
            .unwrap();
        assert_eq!(sliced.sum().unwrap(), 20);
    }

    #[test]
    fn double_striding() {
        let x = Array::<i32>::arange(&[2, 3, 4]).unwrap();
        let interesting = |dim: isize| {
            let mut out = Vec::new();
            for start in 0..dim {
                for end in start + 1..=dim {
                    for step in [-2isize, -1, 1, 2] {
                        out.push(Slice::with_step(start, end, step).unwrap());
                    }
                }
            }
            out
        };
        for s0 in interesting(2) {
            for s1 in interesting(3) {
                for s2 in interesting(4) {
                    let sliced = x
                        .slice(0, s0)
                        .unwrap()
                        .slice(1, s1)
                        .unwrap()
                        .slice(2, s2)
                        .unwrap();
                    let mut expected = 0;
                    for i in 0..2isize {
                        for j in 0..3isize {
                            for k in 0..4isize {
                                if s0.contains(i).unwrap()
                                    && s1.contains(j).unwrap()
                                    && s2.contains(k).unwrap()
                                {
                                    expected += (i * 12 + j * 4 + k) as i32;
                                }
                            }
                        }
                    }
                    assert_eq!(sliced.sum().unwrap(), expected);
                }
            }
        }
    }

    #[test]
    fn transpose_reverses_axes() {
        let z = Array::<i32>::arange(&[2, 3, 4]).unwrap();
        let z_t = z.transpose().unwrap();
        assert_eq!(z_t.shape(), &[4, 3, 2]);
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    assert_eq!(z.at(&[i, j, k]).unwrap(), z_t.at(&[k, j, i]).unwrap());
                }
            }
        }

        let z_perm = z.transpose_with(&[1, 0, 2]).unwrap();
        assert_eq!(z_perm.shape(), &[3, 2, 4]);
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    assert_eq!(z.at(&[i, j, k]).unwrap(), z_perm.at(&[j, i, k]).unwrap());
                }
            }
        }
    }

    #[test]
    fn transpose_roundtrip_is_identity() {
        let x = Array::<i32>::arange(&[2, 3, 4]).unwrap();
        let perm = [2usize, 0, 1];
        let mut inverse = [0usize; 3];
        for (i, &p) in perm.iter().enumerate() {
            inverse[p] = i;
        }
        let back = x
            .transpose_with(&perm)
            .unwrap()
            .transpose_with(&inverse)
            .unwrap();
        assert_eq!(back.to_vec().unwrap(), x.to_vec().unwrap());
    }

    #[test]
    fn strides_compacted_after_expansion() {
        let x = Array::<f32>::zeros(&[2, 3, 4]).unwrap();
        for axis in 0..=3 {
            assert_eq!(x.expand_dims(axis).unwrap().strides(), &[] as &[isize]);
        }
    }

    #[test]
    fn reshape_broadcasted_grows_marked_axes() {
        let b = Array::<i32>::ones(&[3]).unwrap();
        let b = b
            .expand_dims(0)
            .unwrap()
            .broadcast_axis(0)
            .unwrap()
            .expand_dims(2)
            .unwrap()
            .broadcast_axis(2)
            .unwrap();
        let b = b.reshape_broadcasted(&[2, 3, 4]).unwrap();
        assert_eq!(b.shape(), &[2, 3, 4]);
        assert_eq!(b.sum().unwrap(), 2 * 3 * 4);
    }

    #[test]
    fn reshape_broadcasted_validates() {
        let b = Array::<i32>::ones(&[3]).unwrap();
        let b = b
            .expand_dims(0)
            .unwrap()
            .broadcast_axis(0)
            .unwrap()
            .expand_dims(2)
            .unwrap()
            .broadcast_axis(2)
            .unwrap();

        let b = b.reshape_broadcasted(&[2, 3, 1]).unwrap();
        let b = b.reshape_broadcasted(&[2, 3, 1]).unwrap();
        let b = b.reshape_broadcasted(&[2, 3, 5]).unwrap();
        let b = b.reshape_broadcasted(&[2, 3, 5]).unwrap();

        assert!(b.reshape_broadcasted(&[5, 3, 5]).is_err());
        assert!(b.reshape_broadcasted(&[1, 3, 5]).is_err());
        assert!(b.reshape_broadcasted(&[2, 3, 1]).is_err());
    }

    #[test]
    fn broadcast_axis_requires_unit_size() {
        let x = Array::<i32>::zeros(&[2, 3]).unwrap();
        assert!(x.broadcast_axis(0).is_err());
        assert!(x.expand_dims(0).unwrap().broadcast_axis(0).is_ok());
    }

    #[test]
    fn strided_flat_access() {
        let x = build_234_arange();
        let view = x
            .slice(0, Slice::new(0, 2))
            .unwrap()
            .pluck_axis(1, 2)
            .unwrap();
        let collected = view.to_vec().unwrap();
        for (i, v) in collected.iter().enumerate() {
            assert_eq!(view.at_flat(i).unwrap(), *v);
        }
    }

    #[test]
    fn canonical_shapes() {
        let x = Array::<f32>::zeros(&[3, 4, 5]).unwrap();
        assert_eq!(x.canonical_shape(1).unwrap(), vec![60]);
        assert_eq!(x.canonical_shape(2).unwrap(), vec![12, 5]);
        assert_eq!(x.canonical_shape(3).unwrap(), vec![3, 4, 5]);
        assert_eq!(x.canonical_shape(4).unwrap(), vec![1, 3, 4, 5]);
    }

    #[test]
    fn axis_reductions() {
        let x = Array::<i32>::arange(&[2, 3]).unwrap();
        // [[0 1 2], [3 4 5]]
        assert_eq!(x.sum_axis(0).unwrap().to_vec().unwrap(), vec![3, 5, 7]);
        assert_eq!(x.sum_axis(1).unwrap().to_vec().unwrap(), vec![3, 12]);
        assert_eq!(x.max_axis(1).unwrap().to_vec().unwrap(), vec![2, 5]);
        assert_eq!(x.min_axis(0).unwrap().to_vec().unwrap(), vec![0, 1, 2]);
        assert_eq!(x.argmax_axis(1).unwrap().to_vec().unwrap(), vec![2, 2]);
        assert_eq!(x.argmin_axis(0).unwrap().to_vec().unwrap(), vec![0, 0, 0]);
        assert_eq!(x.argmax().unwrap(), 5);
        assert_eq!(x.min().unwrap(), 0);
        assert_eq!(x.max().unwrap(), 5);
    }

    #[test]
    fn mean_axis_divides_by_axis_size() {
        let x = Array::<f64>::arange(&[2, 3]).unwrap();
        // [[0 1 2], [3 4 5]]
        assert_eq!(x.mean_axis(0).unwrap().to_vec().unwrap(), vec![1.5, 2.5, 3.5]);
        assert_eq!(x.mean_axis(1).unwrap().to_vec().unwrap(), vec![1.0, 4.0]);
        assert!((x.mean().unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn empty_axis_reductions_error() {
        let x = Array::<f64>::zeros(&[3, 0]).unwrap();
        assert!(x.max_axis(1).is_err());
        assert!(x.min_axis(1).is_err());
        assert!(x.argmax_axis(1).is_err());
        assert!(x.argmin_axis(1).is_err());
        assert!(x.mean_axis(1).is_err());
        // summing nothing is well defined
        assert_eq!(x.sum_axis(1).unwrap().to_vec().unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn deep_copy_detaches() {
        let x = Array::<i32>::arange(&[2, 2]).unwrap();
        let y = x.deep_copy().unwrap();
        assert!(!y.shares_memory(&x));
        y.iadd_scalar(1).unwrap();
        assert_eq!(x.sum().unwrap(), 6);
        assert_eq!(y.sum().unwrap(), 10);
    }

    #[test]
    fn bias_broadcast_in_zip() {
        let x = Array::<f64>::zeros(&[3, 4]).unwrap();
        let bias = Array::<f64>::from_vec(vec![1.0, 2.0, 3.0], &[3, 1]).unwrap();
        x.iadd(&bias).unwrap();
        assert_eq!(x.at(&[0, 3]).unwrap(), 1.0);
        assert_eq!(x.at(&[2, 0]).unwrap(), 3.0);
        assert_eq!(x.sum().unwrap(), 4.0 * (1.0 + 2.0 + 3.0));
    }

    #[test]
    fn mismatched_shapes_error() {
        let x = Array::<f64>::zeros(&[3, 4]).unwrap();
        let y = Array::<f64>::zeros(&[4, 3]).unwrap();
        assert!(x.iadd(&y).is_err());
        assert!(x.at(&[3, 0]).is_err());
        assert!(x.pluck_axis(2, 0).is_err());
        assert!(x.pluck_axis(0, 5).is_err());
    }
}
