use crate::array::Array;
use crate::dtype::{FloatScalar, Scalar};
use crate::error::Result;
use crate::mat::Mat;
use crate::op::BackwardEntry;
use crate::ops::{broadcast_read, matmul_vals, reduce_to_shape, transpose_vals};

// Backward rules — The gradient of every BackwardEntry variant
//
// `apply` dispatches on the entry and adds each input's contribution into
// its `dw`. Gradient buffers allocate (zero-filled) on first touch, so the
// first contribution to a parameter in a pass is also its initialization.
//
// The rules here are raw array arithmetic: nothing in this module records
// onto the tape, so replaying entries can never grow the tape it is
// draining.
//
// Chain-rule summary:
//
//   add:        da += dc             db += reduce(dc)
//   sub:        da += dc             db -= reduce(dc)
//   eltmul:     da += dc ⊙ b         db += dc ⊙ a     (reduced over broadcast)
//   dot:        da += dc · bᵀ        db += aᵀ · dc
//   sigmoid:    da += dc ⊙ y ⊙ (1−y)
//   tanh:       da += dc ⊙ (1−y²)
//   exp:        da += dc ⊙ y
//   log:        da += dc ⊘ a
//   relu:       da += dc where y > 0
//   pow:        da += p · a^(p−1) ⊙ dc
//   sum:        da += dc (scalar, broadcast)
//   mean:       da += dc / n
//   row_pluck:  de[row, :] += dy
//   softmax:    da[:,j] += (dc[:,j] − ⟨dc[:,j], y[:,j]⟩) ⊙ y[:,j]
//   cross-ent:  da[:,j] += (p[:,j] − onehot(tⱼ)) · dc

/// Add `vals` (logical row-major, same shape) into a gradient array.
fn accumulate<R: FloatScalar>(dw: &Array<R>, vals: &[R]) -> Result<()> {
    debug_assert_eq!(dw.elem_count(), vals.len());
    let iter = dw.indices();
    dw.memory().write_host(|buf| {
        for (dst, &v) in iter.zip(vals.iter()) {
            buf[dst] = buf[dst] + v;
        }
    })
}

/// Accumulate an output-shaped gradient into `m.dw`, reducing across any
/// axes `m` broadcast during the forward pass.
fn accumulate_reduced<R: FloatScalar>(
    m: &Mat<R>,
    grad: &[R],
    rows: usize,
    cols: usize,
) -> Result<()> {
    let reduced = reduce_to_shape(grad, rows, cols, m.shape());
    accumulate(m.dw(), &reduced)
}

impl<R: FloatScalar> BackwardEntry<R> {
    /// Run this entry's gradient rule, adding into its inputs' `dw`.
    pub fn apply(&self) -> Result<()> {
        use BackwardEntry::*;
        match self {
            Add { a, b, out } => {
                let dc = out.dw().to_vec()?;
                let (rows, cols) = (out.rows(), out.cols());
                accumulate_reduced(a, &dc, rows, cols)?;
                accumulate_reduced(b, &dc, rows, cols)
            }

            AddScalar { a, out } => {
                let dc = out.dw().to_vec()?;
                accumulate(a.dw(), &dc)
            }

            Sub { a, b, out } => {
                let dc = out.dw().to_vec()?;
                let (rows, cols) = (out.rows(), out.cols());
                accumulate_reduced(a, &dc, rows, cols)?;
                let neg: Vec<R> = dc.iter().map(|&v| R::from_f64(-v.to_f64())).collect();
                accumulate_reduced(b, &neg, rows, cols)
            }

            Neg { a, out } => {
                let dc = out.dw().to_vec()?;
                let neg: Vec<R> = dc.iter().map(|&v| R::from_f64(-v.to_f64())).collect();
                accumulate(a.dw(), &neg)
            }

            Eltmul { a, b, out } => {
                let dc = out.dw().to_vec()?;
                let (rows, cols) = (out.rows(), out.cols());
                let av = a.w().to_vec()?;
                let bv = b.w().to_vec()?;
                let mut da = vec![<R as Scalar>::zero(); rows * cols];
                let mut db = vec![<R as Scalar>::zero(); rows * cols];
                for i in 0..rows {
                    for j in 0..cols {
                        let g = dc[i * cols + j].to_f64();
                        da[i * cols + j] =
                            R::from_f64(g * broadcast_read(&bv, b.shape(), i, j).to_f64());
                        db[i * cols + j] =
                            R::from_f64(g * broadcast_read(&av, a.shape(), i, j).to_f64());
                    }
                }
                accumulate_reduced(a, &da, rows, cols)?;
                accumulate_reduced(b, &db, rows, cols)
            }

            MulScalar { a, scalar, out } => {
                let s = (*scalar).to_f64();
                let dc = out.dw().to_vec()?;
                let da: Vec<R> = dc.iter().map(|&v| R::from_f64(v.to_f64() * s)).collect();
                accumulate(a.dw(), &da)
            }

            Dot { a, b, out } => {
                let dc = out.dw().to_vec()?;
                let (m, k, n) = (a.rows(), a.cols(), b.cols());
                let av = a.w().to_vec()?;
                let bv = b.w().to_vec()?;
                // da += dc · bᵀ : [m,n]·[n,k]
                let bt = transpose_vals(&bv, k, n);
                accumulate(a.dw(), &matmul_vals(&dc, m, n, &bt, k))?;
                // db += aᵀ · dc : [k,m]·[m,n]
                let at = transpose_vals(&av, m, k);
                accumulate(b.dw(), &matmul_vals(&at, k, m, &dc, n))
            }

            MulWithBias { w, x, bias, out } => {
                let dc = out.dw().to_vec()?;
                let (m, k, n) = (w.rows(), w.cols(), x.cols());
                let wv = w.w().to_vec()?;
                let xv = x.w().to_vec()?;
                let xt = transpose_vals(&xv, k, n);
                accumulate(w.dw(), &matmul_vals(&dc, m, n, &xt, k))?;
                let wt = transpose_vals(&wv, m, k);
                accumulate(x.dw(), &matmul_vals(&wt, k, m, &dc, n))?;
                accumulate_reduced(bias, &dc, m, n)
            }

            MulAddMulWithBias { pairs, bias, out } => {
                let dc = out.dw().to_vec()?;
                let (m, n) = (out.rows(), out.cols());
                for (w, x) in pairs {
                    let k = w.cols();
                    let wv = w.w().to_vec()?;
                    let xv = x.w().to_vec()?;
                    let xt = transpose_vals(&xv, k, n);
                    accumulate(w.dw(), &matmul_vals(&dc, m, n, &xt, k))?;
                    let wt = transpose_vals(&wv, m, k);
                    accumulate(x.dw(), &matmul_vals(&wt, k, m, &dc, n))?;
                }
                accumulate_reduced(bias, &dc, m, n)
            }

            Sigmoid { a, out } => {
                let dc = out.dw().to_vec()?;
                let y = out.w().to_vec()?;
                let da: Vec<R> = dc
                    .iter()
                    .zip(y.iter())
                    .map(|(&g, &y)| {
                        let y = y.to_f64();
                        R::from_f64(g.to_f64() * y * (1.0 - y))
                    })
                    .collect();
                accumulate(a.dw(), &da)
            }

            Tanh { a, out } => {
                let dc = out.dw().to_vec()?;
                let y = out.w().to_vec()?;
                let da: Vec<R> = dc
                    .iter()
                    .zip(y.iter())
                    .map(|(&g, &y)| {
                        let y = y.to_f64();
                        R::from_f64(g.to_f64() * (1.0 - y * y))
                    })
                    .collect();
                accumulate(a.dw(), &da)
            }

            Exp { a, out } => {
                let dc = out.dw().to_vec()?;
                let y = out.w().to_vec()?;
                let da: Vec<R> = dc
                    .iter()
                    .zip(y.iter())
                    .map(|(&g, &y)| R::from_f64(g.to_f64() * y.to_f64()))
                    .collect();
                accumulate(a.dw(), &da)
            }

            Log { a, out } => {
                let dc = out.dw().to_vec()?;
                let av = a.w().to_vec()?;
                let da: Vec<R> = dc
                    .iter()
                    .zip(av.iter())
                    .map(|(&g, &v)| R::from_f64(g.to_f64() / v.to_f64()))
                    .collect();
                accumulate(a.dw(), &da)
            }

            Relu { a, out } => {
                let dc = out.dw().to_vec()?;
                let y = out.w().to_vec()?;
                let da: Vec<R> = dc
                    .iter()
                    .zip(y.iter())
                    .map(|(&g, &y)| {
                        if y.to_f64() > 0.0 {
                            g
                        } else {
                            <R as Scalar>::zero()
                        }
                    })
                    .collect();
                accumulate(a.dw(), &da)
            }

            Pow { a, power, out } => {
                let p = (*power).to_f64();
                let dc = out.dw().to_vec()?;
                let av = a.w().to_vec()?;
                let da: Vec<R> = dc
                    .iter()
                    .zip(av.iter())
                    .map(|(&g, &v)| R::from_f64(g.to_f64() * p * v.to_f64().powf(p - 1.0)))
                    .collect();
                accumulate(a.dw(), &da)
            }

            Transpose { a, out } => {
                let dc = out.dw().to_vec()?;
                let dct = transpose_vals(&dc, out.rows(), out.cols());
                accumulate(a.dw(), &dct)
            }

            Sum { a, out } => {
                let s = out.dw().at_flat(0)?;
                a.dw().iadd_scalar(s)
            }

            Mean { a, out } => {
                let s = out.dw().at_flat(0)?.to_f64();
                let n = a.elem_count() as f64;
                a.dw().iadd_scalar(R::from_f64(s / n))
            }

            RowPluck { e, row, out } => {
                let dy = out.dw().to_vec()?;
                let row_view = e.dw().pluck_axis(0, *row)?;
                accumulate(&row_view, &dy)
            }

            RowsPluck { e, rows, out } => {
                let dy = out.dw().to_vec()?;
                let k = rows.len();
                for (col, &row) in rows.iter().enumerate() {
                    let column: Vec<R> = (0..out.rows()).map(|r| dy[r * k + col]).collect();
                    let row_view = e.dw().pluck_axis(0, row)?;
                    accumulate(&row_view, &column)?;
                }
                Ok(())
            }

            Softmax { a, out } => {
                let dc = out.dw().to_vec()?;
                let y = out.w().to_vec()?;
                let (rows, cols) = (out.rows(), out.cols());
                let mut da = vec![<R as Scalar>::zero(); rows * cols];
                for j in 0..cols {
                    let mut inner = 0.0;
                    for i in 0..rows {
                        inner += dc[i * cols + j].to_f64() * y[i * cols + j].to_f64();
                    }
                    for i in 0..rows {
                        let idx = i * cols + j;
                        da[idx] = R::from_f64(
                            (dc[idx].to_f64() - inner) * y[idx].to_f64(),
                        );
                    }
                }
                accumulate(a.dw(), &da)
            }

            CrossEntropy {
                a,
                probs,
                targets,
                out,
            } => {
                let s = out.dw().at_flat(0)?.to_f64();
                let (rows, cols) = (a.rows(), a.cols());
                let mut da = vec![<R as Scalar>::zero(); rows * cols];
                for (j, &t) in targets.iter().enumerate() {
                    for i in 0..rows {
                        let idx = i * cols + j;
                        let onehot = if i == t { 1.0 } else { 0.0 };
                        da[idx] = R::from_f64((probs[idx].to_f64() - onehot) * s);
                    }
                }
                accumulate(a.dw(), &da)
            }
        }
    }
}
