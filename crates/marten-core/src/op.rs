// BackwardEntry — One recorded step of the computation, ready to replay
//
// Every differentiable op pushes one entry onto the current thread's tape.
// An entry is a tagged variant holding shared Mat handles to the op's
// participants plus whatever scalars the gradient rule needs — no boxed
// closures, so the tape is inspectable, cheap to move, and dispatch during
// backward is a plain match (see backprop.rs for the rules).
//
// Entries keep their inputs alive: a Mat handle is an Arc, so as long as
// the tape holds an entry, the arrays that entry will write gradients into
// cannot be dropped.

use crate::dtype::FloatScalar;
use crate::mat::Mat;

/// A recorded backward step. One variant per differentiable op kind.
pub enum BackwardEntry<R: FloatScalar> {
    /// c = a + b, where b may be a [H,1] column-broadcast bias.
    Add { a: Mat<R>, b: Mat<R>, out: Mat<R> },

    /// c = a + s for a scalar s.
    AddScalar { a: Mat<R>, out: Mat<R> },

    /// c = a - b.
    Sub { a: Mat<R>, b: Mat<R>, out: Mat<R> },

    /// c = -a.
    Neg { a: Mat<R>, out: Mat<R> },

    /// c = a ⊙ b element-wise, either side may broadcast from [H,1]/[1,N].
    Eltmul { a: Mat<R>, b: Mat<R>, out: Mat<R> },

    /// c = s · a for a scalar s.
    MulScalar { a: Mat<R>, scalar: R, out: Mat<R> },

    /// c = a · b (matrix product).
    Dot { a: Mat<R>, b: Mat<R>, out: Mat<R> },

    /// c = w · x + bias, the fused layer kernel.
    MulWithBias {
        w: Mat<R>,
        x: Mat<R>,
        bias: Mat<R>,
        out: Mat<R>,
    },

    /// c = Σᵢ wᵢ · xᵢ + bias, the fused stacked-input kernel.
    MulAddMulWithBias {
        pairs: Vec<(Mat<R>, Mat<R>)>,
        bias: Mat<R>,
        out: Mat<R>,
    },

    /// c = σ(a). Backward reads the saved output.
    Sigmoid { a: Mat<R>, out: Mat<R> },

    /// c = tanh(a). Backward reads the saved output.
    Tanh { a: Mat<R>, out: Mat<R> },

    /// c = exp(a). Backward reads the saved output.
    Exp { a: Mat<R>, out: Mat<R> },

    /// c = ln(a). Backward reads the saved input.
    Log { a: Mat<R>, out: Mat<R> },

    /// c = max(a, 0).
    Relu { a: Mat<R>, out: Mat<R> },

    /// c = a^p element-wise.
    Pow { a: Mat<R>, power: R, out: Mat<R> },

    /// c = aᵀ.
    Transpose { a: Mat<R>, out: Mat<R> },

    /// c = Σ a (scalar output).
    Sum { a: Mat<R>, out: Mat<R> },

    /// c = mean(a) (scalar output).
    Mean { a: Mat<R>, out: Mat<R> },

    /// c = e[row, :] as a column vector.
    RowPluck { e: Mat<R>, row: usize, out: Mat<R> },

    /// c = selected rows of e, stacked as columns.
    RowsPluck {
        e: Mat<R>,
        rows: Vec<usize>,
        out: Mat<R>,
    },

    /// c = softmax(a) column-wise.
    Softmax { a: Mat<R>, out: Mat<R> },

    /// c = -Σⱼ log softmax(a)[targetⱼ, j] (scalar output).
    /// `probs` caches the forward softmax so backward is p − onehot.
    CrossEntropy {
        a: Mat<R>,
        probs: Vec<R>,
        targets: Vec<usize>,
        out: Mat<R>,
    },
}

impl<R: FloatScalar> BackwardEntry<R> {
    /// The Mats whose gradients this entry contributes to.
    pub fn inputs(&self) -> Vec<&Mat<R>> {
        use BackwardEntry::*;
        match self {
            Add { a, b, .. } | Sub { a, b, .. } | Eltmul { a, b, .. } | Dot { a, b, .. } => {
                vec![a, b]
            }
            AddScalar { a, .. }
            | Neg { a, .. }
            | MulScalar { a, .. }
            | Sigmoid { a, .. }
            | Tanh { a, .. }
            | Exp { a, .. }
            | Log { a, .. }
            | Relu { a, .. }
            | Pow { a, .. }
            | Transpose { a, .. }
            | Sum { a, .. }
            | Mean { a, .. }
            | Softmax { a, .. }
            | CrossEntropy { a, .. } => vec![a],
            MulWithBias { w, x, bias, .. } => vec![w, x, bias],
            MulAddMulWithBias { pairs, bias, .. } => {
                let mut v: Vec<&Mat<R>> = Vec::with_capacity(pairs.len() * 2 + 1);
                for (w, x) in pairs {
                    v.push(w);
                    v.push(x);
                }
                v.push(bias);
                v
            }
            RowPluck { e, .. } | RowsPluck { e, .. } => vec![e],
        }
    }

    fn kind(&self) -> &'static str {
        use BackwardEntry::*;
        match self {
            Add { .. } => "add",
            AddScalar { .. } => "add_scalar",
            Sub { .. } => "sub",
            Neg { .. } => "neg",
            Eltmul { .. } => "eltmul",
            MulScalar { .. } => "mul_scalar",
            Dot { .. } => "dot",
            MulWithBias { .. } => "mul_with_bias",
            MulAddMulWithBias { .. } => "mul_add_mul_with_bias",
            Sigmoid { .. } => "sigmoid",
            Tanh { .. } => "tanh",
            Exp { .. } => "exp",
            Log { .. } => "log",
            Relu { .. } => "relu",
            Pow { .. } => "pow",
            Transpose { .. } => "transpose",
            Sum { .. } => "sum",
            Mean { .. } => "mean",
            RowPluck { .. } => "row_pluck",
            RowsPluck { .. } => "rows_pluck",
            Softmax { .. } => "softmax",
            CrossEntropy { .. } => "cross_entropy",
        }
    }
}

// Concise Debug: op kind and participating ids, never tensor contents.
impl<R: FloatScalar> std::fmt::Debug for BackwardEntry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u64> = self.inputs().iter().map(|m| m.id()).collect();
        write!(f, "{}(ids={:?})", self.kind(), ids)
    }
}
