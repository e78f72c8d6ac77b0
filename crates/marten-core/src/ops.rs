use crate::dtype::{FloatScalar, Scalar};
use crate::error::{Error, Result};
use crate::mat::Mat;
use crate::op::BackwardEntry;
use crate::tape;

// Op library — Forward rules for every differentiable primitive
//
// Each op validates shapes, computes its result on the host, wraps it in a
// fresh Mat, and (when the thread is recording) pushes a BackwardEntry onto
// the tape. The matching gradient rules live in backprop.rs.
//
// Broadcasting: binary ops accept operands whose shapes agree on each axis
// or where one operand has size 1 on a disagreeing axis — the [H,1] bias
// against an [H,N] batch is the canonical case. The backward pass reduces
// gradient contributions back across broadcast axes.

/// Output shape of a broadcasting binary op, or a ShapeMismatch naming it.
fn broadcast_shape<R: FloatScalar>(op: &'static str, a: &Mat<R>, b: &Mat<R>) -> Result<[usize; 2]> {
    let (ar, ac) = (a.rows(), a.cols());
    let (br, bc) = (b.rows(), b.cols());
    let rows = if ar == br {
        ar
    } else if ar == 1 {
        br
    } else if br == 1 {
        ar
    } else {
        return Err(Error::ShapeMismatch {
            op,
            lhs: a.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    };
    let cols = if ac == bc {
        ac
    } else if ac == 1 {
        bc
    } else if bc == 1 {
        ac
    } else {
        return Err(Error::ShapeMismatch {
            op,
            lhs: a.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    };
    Ok([rows, cols])
}

/// Plain matrix product of row-major buffers: [m,k] · [k,n] → [m,n].
/// Accumulates in f64 regardless of R.
pub(crate) fn matmul_vals<R: FloatScalar>(
    a: &[R],
    m: usize,
    k: usize,
    b: &[R],
    n: usize,
) -> Vec<R> {
    let mut out = vec![<R as Scalar>::zero(); m * n];
    for i in 0..m {
        for p in 0..k {
            let av = a[i * k + p].to_f64();
            if av == 0.0 {
                continue;
            }
            for j in 0..n {
                let cur = out[i * n + j].to_f64();
                out[i * n + j] = R::from_f64(cur + av * b[p * n + j].to_f64());
            }
        }
    }
    out
}

/// Transpose a row-major [m,n] buffer into [n,m].
pub(crate) fn transpose_vals<R: FloatScalar>(vals: &[R], m: usize, n: usize) -> Vec<R> {
    let mut out = vec![<R as Scalar>::zero(); vals.len()];
    for i in 0..m {
        for j in 0..n {
            out[j * m + i] = vals[i * n + j];
        }
    }
    out
}

/// Column-wise, max-shifted softmax of a row-major [rows, cols] buffer.
pub(crate) fn softmax_vals<R: FloatScalar>(vals: &[R], rows: usize, cols: usize) -> Vec<R> {
    let mut out = vec![<R as Scalar>::zero(); vals.len()];
    for j in 0..cols {
        let mut maxv = f64::NEG_INFINITY;
        for i in 0..rows {
            maxv = maxv.max(vals[i * cols + j].to_f64());
        }
        let mut total = 0.0;
        for i in 0..rows {
            let e = (vals[i * cols + j].to_f64() - maxv).exp();
            out[i * cols + j] = R::from_f64(e);
            total += e;
        }
        for i in 0..rows {
            out[i * cols + j] = R::from_f64(out[i * cols + j].to_f64() / total);
        }
    }
    out
}

/// Add `src` (shape `src_shape`) into a logical [rows, cols] buffer,
/// repeating broadcast axes.
fn add_broadcast_into<R: FloatScalar>(
    dst: &mut [R],
    rows: usize,
    cols: usize,
    src: &[R],
    src_shape: &[usize],
    f: impl Fn(f64, f64) -> f64,
) {
    let (sr, sc) = (src_shape[0], src_shape[1]);
    for i in 0..rows {
        let si = if sr == 1 { 0 } else { i };
        for j in 0..cols {
            let sj = if sc == 1 { 0 } else { j };
            let d = i * cols + j;
            dst[d] = R::from_f64(f(dst[d].to_f64(), src[si * sc + sj].to_f64()));
        }
    }
}

fn binary_forward<R: FloatScalar>(
    op: &'static str,
    a: &Mat<R>,
    b: &Mat<R>,
    init: fn(f64, f64) -> f64,
) -> Result<Mat<R>> {
    let [rows, cols] = broadcast_shape(op, a, b)?;
    let av = a.w().to_vec()?;
    let bv = b.w().to_vec()?;
    let mut out = vec![<R as Scalar>::zero(); rows * cols];
    add_broadcast_into(&mut out, rows, cols, &av, a.shape(), |_, v| v);
    add_broadcast_into(&mut out, rows, cols, &bv, b.shape(), init);
    Mat::from_vec(rows, cols, out)
}

fn unary_forward<R: FloatScalar>(a: &Mat<R>, f: impl Fn(f64) -> f64) -> Result<Mat<R>> {
    let vals: Vec<R> = a
        .w()
        .to_vec()?
        .into_iter()
        .map(|v| R::from_f64(f(v.to_f64())))
        .collect();
    Mat::from_vec(a.rows(), a.cols(), vals)
}

impl<R: FloatScalar> Mat<R> {
    /// c = a + b, broadcasting size-1 axes (e.g. a [H,1] bias).
    pub fn add(&self, other: &Mat<R>) -> Result<Mat<R>> {
        let out = binary_forward("add", self, other, |acc, v| acc + v)?;
        tape::record(BackwardEntry::Add {
            a: self.clone(),
            b: other.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = a + s.
    pub fn add_scalar(&self, s: R) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| v + s.to_f64())?;
        tape::record(BackwardEntry::AddScalar {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = a - s.
    pub fn sub_scalar(&self, s: R) -> Result<Mat<R>> {
        self.add_scalar(R::from_f64(-s.to_f64()))
    }

    /// c = a - b, broadcasting size-1 axes.
    pub fn sub(&self, other: &Mat<R>) -> Result<Mat<R>> {
        let out = binary_forward("sub", self, other, |acc, v| acc - v)?;
        tape::record(BackwardEntry::Sub {
            a: self.clone(),
            b: other.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = -a.
    pub fn neg(&self) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| -v)?;
        tape::record(BackwardEntry::Neg {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = a ⊙ b element-wise, broadcasting size-1 axes.
    pub fn eltmul(&self, other: &Mat<R>) -> Result<Mat<R>> {
        let out = binary_forward("eltmul", self, other, |acc, v| acc * v)?;
        tape::record(BackwardEntry::Eltmul {
            a: self.clone(),
            b: other.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = s · a.
    pub fn mul_scalar(&self, s: R) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| v * s.to_f64())?;
        tape::record(BackwardEntry::MulScalar {
            a: self.clone(),
            scalar: s,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Matrix product c = a · b.
    pub fn dot(&self, other: &Mat<R>) -> Result<Mat<R>> {
        if self.cols() != other.rows() {
            return Err(Error::ShapeMismatch {
                op: "dot",
                lhs: self.shape().to_vec(),
                rhs: other.shape().to_vec(),
            });
        }
        let (m, k, n) = (self.rows(), self.cols(), other.cols());
        let av = self.w().to_vec()?;
        let bv = other.w().to_vec()?;
        let out = Mat::from_vec(m, n, matmul_vals(&av, m, k, &bv, n))?;
        tape::record(BackwardEntry::Dot {
            a: self.clone(),
            b: other.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = σ(a), computed stably for large |a|.
    pub fn sigmoid(&self) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| {
            if v >= 0.0 {
                1.0 / (1.0 + (-v).exp())
            } else {
                let e = v.exp();
                e / (1.0 + e)
            }
        })?;
        tape::record(BackwardEntry::Sigmoid {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = tanh(a).
    pub fn tanh(&self) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| v.tanh())?;
        tape::record(BackwardEntry::Tanh {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = exp(a).
    pub fn exp(&self) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| v.exp())?;
        tape::record(BackwardEntry::Exp {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = ln(a).
    pub fn log(&self) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| v.ln())?;
        tape::record(BackwardEntry::Log {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = max(a, 0).
    pub fn relu(&self) -> Result<Mat<R>> {
        let out = unary_forward(self, |v| v.max(0.0))?;
        tape::record(BackwardEntry::Relu {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = a^p element-wise.
    pub fn pow(&self, power: R) -> Result<Mat<R>> {
        let p = power.to_f64();
        let out = unary_forward(self, |v| v.powf(p))?;
        tape::record(BackwardEntry::Pow {
            a: self.clone(),
            power,
            out: out.clone(),
        });
        Ok(out)
    }

    /// c = aᵀ.
    pub fn transpose(&self) -> Result<Mat<R>> {
        let vals = self.w().to_vec()?;
        let out = Mat::from_vec(
            self.cols(),
            self.rows(),
            transpose_vals(&vals, self.rows(), self.cols()),
        )?;
        tape::record(BackwardEntry::Transpose {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Scalar c = Σ a, as a [1,1] Mat.
    pub fn sum(&self) -> Result<Mat<R>> {
        let total = self.w().sum()?;
        let out = Mat::from_vec(1, 1, vec![total])?;
        tape::record(BackwardEntry::Sum {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Scalar c = mean(a), as a [1,1] Mat.
    pub fn mean(&self) -> Result<Mat<R>> {
        let m = self.w().mean()?;
        let out = Mat::from_vec(1, 1, vec![m])?;
        tape::record(BackwardEntry::Mean {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// The `row`-th row of this matrix as a column vector [cols, 1].
    pub fn row_pluck(&self, row: usize) -> Result<Mat<R>> {
        if row >= self.rows() {
            return Err(Error::OutOfRange {
                op: "row_pluck",
                axis: 0,
                index: row as isize,
                bound: self.rows(),
            });
        }
        let vals = self.w().pluck_axis(0, row)?.to_vec()?;
        let out = Mat::from_vec(self.cols(), 1, vals)?;
        tape::record(BackwardEntry::RowPluck {
            e: self.clone(),
            row,
            out: out.clone(),
        });
        Ok(out)
    }

    /// Selected rows stacked as columns: out[:, k] = self[rows[k], :].
    pub fn rows_pluck(&self, rows: &[usize]) -> Result<Mat<R>> {
        let d = self.cols();
        let k = rows.len();
        let mut vals = vec![<R as Scalar>::zero(); d * k];
        for (col, &row) in rows.iter().enumerate() {
            if row >= self.rows() {
                return Err(Error::OutOfRange {
                    op: "rows_pluck",
                    axis: 0,
                    index: row as isize,
                    bound: self.rows(),
                });
            }
            let picked = self.w().pluck_axis(0, row)?.to_vec()?;
            for (r, &v) in picked.iter().enumerate() {
                vals[r * k + col] = v;
            }
        }
        let out = Mat::from_vec(d, k, vals)?;
        tape::record(BackwardEntry::RowsPluck {
            e: self.clone(),
            rows: rows.to_vec(),
            out: out.clone(),
        });
        Ok(out)
    }

    /// Column-wise softmax: every column sums to 1.
    pub fn softmax(&self) -> Result<Mat<R>> {
        let canon = self.w().canonical_shape(2)?;
        let (rows, cols) = (canon[0], canon[1]);
        let vals = self.w().to_vec()?;
        // the canonical collapse folds leading axes into rows; for a 2-D
        // Mat this is the identity, and columns stay the normalizing axis
        let out = Mat::from_vec(rows, cols, softmax_vals(&vals, rows, cols))?;
        tape::record(BackwardEntry::Softmax {
            a: self.clone(),
            out: out.clone(),
        });
        Ok(out)
    }
}

/// Fused c = w · x + bias. The workhorse of the linear layer.
pub fn mul_with_bias<R: FloatScalar>(w: &Mat<R>, x: &Mat<R>, bias: &Mat<R>) -> Result<Mat<R>> {
    if w.cols() != x.rows() || bias.rows() != w.rows() {
        return Err(Error::ShapeMismatch {
            op: "mul_with_bias",
            lhs: w.shape().to_vec(),
            rhs: x.shape().to_vec(),
        });
    }
    let (m, k, n) = (w.rows(), w.cols(), x.cols());
    let wv = w.w().to_vec()?;
    let xv = x.w().to_vec()?;
    let mut vals = matmul_vals(&wv, m, k, &xv, n);
    let bv = bias.w().to_vec()?;
    add_broadcast_into(&mut vals, m, n, &bv, bias.shape(), |acc, v| acc + v);
    let out = Mat::from_vec(m, n, vals)?;
    tape::record(BackwardEntry::MulWithBias {
        w: w.clone(),
        x: x.clone(),
        bias: bias.clone(),
        out: out.clone(),
    });
    Ok(out)
}

/// Fused c = Σᵢ wᵢ · xᵢ + bias over any number of (wᵢ, xᵢ) pairs.
/// The stacked-input layer's kernel: summing matrix products instead of
/// concatenating inputs.
pub fn mul_add_mul_with_bias<R: FloatScalar>(
    pairs: &[(&Mat<R>, &Mat<R>)],
    bias: &Mat<R>,
) -> Result<Mat<R>> {
    if pairs.is_empty() {
        return Err(Error::msg("mul_add_mul_with_bias needs at least one pair"));
    }
    let m = pairs[0].0.rows();
    let n = pairs[0].1.cols();
    let mut vals = vec![<R as Scalar>::zero(); m * n];
    for (w, x) in pairs {
        if w.rows() != m || x.cols() != n || w.cols() != x.rows() {
            return Err(Error::ShapeMismatch {
                op: "mul_add_mul_with_bias",
                lhs: w.shape().to_vec(),
                rhs: x.shape().to_vec(),
            });
        }
        let wv = w.w().to_vec()?;
        let xv = x.w().to_vec()?;
        let prod = matmul_vals(&wv, m, w.cols(), &xv, n);
        for (dst, v) in vals.iter_mut().zip(prod.into_iter()) {
            *dst = R::from_f64(dst.to_f64() + v.to_f64());
        }
    }
    if bias.rows() != m {
        return Err(Error::ShapeMismatch {
            op: "mul_add_mul_with_bias",
            lhs: vec![m, n],
            rhs: bias.shape().to_vec(),
        });
    }
    let bv = bias.w().to_vec()?;
    add_broadcast_into(&mut vals, m, n, &bv, bias.shape(), |acc, v| acc + v);
    let out = Mat::from_vec(m, n, vals)?;
    tape::record(BackwardEntry::MulAddMulWithBias {
        pairs: pairs.iter().map(|(w, x)| ((*w).clone(), (*x).clone())).collect(),
        bias: bias.clone(),
        out: out.clone(),
    });
    Ok(out)
}

/// Scalar cost c = −Σⱼ log softmax(a)[targetⱼ, j].
///
/// Takes raw (pre-softmax) activations; the probabilities are computed here
/// and cached on the tape so backward is simply p − onehot.
pub fn cross_entropy<R: FloatScalar>(logits: &Mat<R>, targets: &[usize]) -> Result<Mat<R>> {
    let (rows, cols) = (logits.rows(), logits.cols());
    if targets.len() != cols {
        return Err(Error::ShapeMismatch {
            op: "cross_entropy",
            lhs: logits.shape().to_vec(),
            rhs: vec![targets.len()],
        });
    }
    for &t in targets {
        if t >= rows {
            return Err(Error::OutOfRange {
                op: "cross_entropy",
                axis: 0,
                index: t as isize,
                bound: rows,
            });
        }
    }
    let vals = logits.w().to_vec()?;
    let probs = softmax_vals(&vals, rows, cols);
    let mut cost = 0.0;
    for (j, &t) in targets.iter().enumerate() {
        // clamp away from zero so a saturated softmax stays finite
        let p = probs[t * cols + j].to_f64().max(1e-30);
        cost -= p.ln();
    }
    let out = Mat::from_vec(1, 1, vec![R::from_f64(cost)])?;
    tape::record(BackwardEntry::CrossEntropy {
        a: logits.clone(),
        probs,
        targets: targets.to_vec(),
        out: out.clone(),
    });
    Ok(out)
}

/// Non-recorded helpers used by solvers and drivers.
impl<R: FloatScalar> Mat<R> {
    /// The scalar value of a [1,1] Mat.
    pub fn scalar_value(&self) -> Result<R> {
        if self.elem_count() != 1 {
            return Err(Error::ShapeMismatch {
                op: "scalar_value",
                lhs: self.shape().to_vec(),
                rhs: vec![1, 1],
            });
        }
        self.w().at_flat(0)
    }
}

pub(crate) fn reduce_to_shape<R: FloatScalar>(
    grad: &[R],
    rows: usize,
    cols: usize,
    target: &[usize],
) -> Vec<R> {
    let (tr, tc) = (target[0], target[1]);
    if tr == rows && tc == cols {
        return grad.to_vec();
    }
    let mut out = vec![<R as Scalar>::zero(); tr * tc];
    for i in 0..rows {
        let ti = if tr == 1 { 0 } else { i };
        for j in 0..cols {
            let tj = if tc == 1 { 0 } else { j };
            let d = ti * tc + tj;
            out[d] = R::from_f64(out[d].to_f64() + grad[i * cols + j].to_f64());
        }
    }
    out
}

pub(crate) fn broadcast_read<R: FloatScalar>(
    vals: &[R],
    shape: &[usize],
    i: usize,
    j: usize,
) -> R {
    let (r, c) = (shape[0], shape[1]);
    let si = if r == 1 { 0 } else { i };
    let sj = if c == 1 { 0 } else { j };
    vals[si * c + sj]
}
