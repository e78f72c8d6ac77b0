use marten_core::{mul_add_mul_with_bias, mul_with_bias, FloatScalar, Mat, Result};

use crate::init;

// Layer — Affine output layer with a broadcast bias
//
//   y = W · x + b
//
// Columns are examples: x is [input, N], y is [hidden, N], and the bias
// [hidden, 1] broadcasts across the batch.

/// A linear layer y = W·x + b.
pub struct Layer<R: FloatScalar> {
    pub w: Mat<R>,
    pub b: Mat<R>,
    pub input_size: usize,
    pub hidden_size: usize,
}

impl<R: FloatScalar> Layer<R> {
    pub fn new(input_size: usize, hidden_size: usize) -> Result<Self> {
        Ok(Layer {
            w: init::fan_in_uniform(hidden_size, input_size, input_size)?,
            b: Mat::zeros(hidden_size, 1)?,
            input_size,
            hidden_size,
        })
    }

    /// y = W·x + b for a batch x of shape [input, N].
    pub fn activate(&self, x: &Mat<R>) -> Result<Mat<R>> {
        mul_with_bias(&self.w, x, &self.b)
    }

    /// Trainable parameters, in a deterministic order.
    pub fn parameters(&self) -> Vec<Mat<R>> {
        vec![self.w.clone(), self.b.clone()]
    }

    /// A Hogwild worker copy: parameters share `w` buffers with this layer
    /// but own fresh gradients.
    pub fn shadow_copy(&self) -> Result<Self> {
        Ok(Layer {
            w: self.w.encapsulate()?,
            b: self.b.encapsulate()?,
            input_size: self.input_size,
            hidden_size: self.hidden_size,
        })
    }
}

// StackedInputLayer — One affine block over several inputs
//
//   y = Σₖ Wₖ · xₖ + b
//
// Equivalent to concatenating the inputs and using a single wide W, but
// without materializing the concatenation. An RNN cell is exactly this
// layer over [input, hidden].

/// A fused multi-input affine layer y = Σ Wₖ·xₖ + b.
pub struct StackedInputLayer<R: FloatScalar> {
    pub matrices: Vec<Mat<R>>,
    pub b: Mat<R>,
    pub input_sizes: Vec<usize>,
    pub hidden_size: usize,
}

impl<R: FloatScalar> StackedInputLayer<R> {
    pub fn new(input_sizes: Vec<usize>, hidden_size: usize) -> Result<Self> {
        // scale every block by the total fan-in, as a single concatenated
        // matrix would be
        let fan_in: usize = input_sizes.iter().sum();
        let mut matrices = Vec::with_capacity(input_sizes.len());
        for &input in &input_sizes {
            matrices.push(init::fan_in_uniform(hidden_size, input, fan_in)?);
        }
        Ok(StackedInputLayer {
            matrices,
            b: Mat::zeros(hidden_size, 1)?,
            input_sizes,
            hidden_size,
        })
    }

    /// y = Σ Wₖ·xₖ + b. `inputs` must match the construction arity.
    pub fn activate(&self, inputs: &[&Mat<R>]) -> Result<Mat<R>> {
        if inputs.len() != self.matrices.len() {
            marten_core::bail!(
                "stacked layer expects {} inputs, got {}",
                self.matrices.len(),
                inputs.len()
            );
        }
        let pairs: Vec<(&Mat<R>, &Mat<R>)> = self
            .matrices
            .iter()
            .zip(inputs.iter().copied())
            .collect();
        mul_add_mul_with_bias(&pairs, &self.b)
    }

    pub fn parameters(&self) -> Vec<Mat<R>> {
        let mut params: Vec<Mat<R>> = self.matrices.to_vec();
        params.push(self.b.clone());
        params
    }

    pub fn shadow_copy(&self) -> Result<Self> {
        let matrices = self
            .matrices
            .iter()
            .map(|m| m.encapsulate())
            .collect::<Result<Vec<_>>>()?;
        Ok(StackedInputLayer {
            matrices,
            b: self.b.encapsulate()?,
            input_sizes: self.input_sizes.clone(),
            hidden_size: self.hidden_size,
        })
    }
}
