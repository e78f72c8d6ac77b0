use marten_core::{mul_add_mul_with_bias, FloatScalar, Mat, Result};

use crate::init;

// Recurrent cells — RNN, ShortcutRNN, GatedInput
//
// An RNN cell combines an input vector and a hidden vector through a single
// fused matrix-product sum:
//
//   y = Wx · x + Wh · h + b
//
// The shortcut variant adds a third input s from a lower stack level:
//
//   y = Wx · x + Ws · s + Wh · h + b
//
// GatedInput is an RNN with a single output row squeezed through a sigmoid:
// a per-example scalar gate.

/// A recurrent cell y = Wx·x + Wh·h + b.
pub struct Rnn<R: FloatScalar> {
    pub wx: Mat<R>,
    pub wh: Mat<R>,
    pub b: Mat<R>,
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
}

impl<R: FloatScalar> Rnn<R> {
    /// Square cell: output dimension equals the hidden dimension.
    pub fn new(input_size: usize, hidden_size: usize) -> Result<Self> {
        Self::new_with_output(input_size, hidden_size, hidden_size)
    }

    pub fn new_with_output(input_size: usize, hidden_size: usize, output_size: usize) -> Result<Self> {
        let fan_in = input_size + hidden_size;
        Ok(Rnn {
            wx: init::fan_in_uniform(output_size, input_size, fan_in)?,
            wh: init::fan_in_uniform(output_size, hidden_size, fan_in)?,
            b: Mat::zeros(output_size, 1)?,
            input_size,
            hidden_size,
            output_size,
        })
    }

    /// y = Wx·x + Wh·h + b.
    pub fn activate(&self, input: &Mat<R>, hidden: &Mat<R>) -> Result<Mat<R>> {
        mul_add_mul_with_bias(&[(&self.wx, input), (&self.wh, hidden)], &self.b)
    }

    pub fn parameters(&self) -> Vec<Mat<R>> {
        vec![self.wx.clone(), self.wh.clone(), self.b.clone()]
    }

    pub fn shadow_copy(&self) -> Result<Self> {
        Ok(Rnn {
            wx: self.wx.encapsulate()?,
            wh: self.wh.encapsulate()?,
            b: self.b.encapsulate()?,
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            output_size: self.output_size,
        })
    }
}

/// A recurrent cell with a shortcut input: y = Wx·x + Ws·s + Wh·h + b.
pub struct ShortcutRnn<R: FloatScalar> {
    pub wx: Mat<R>,
    pub ws: Mat<R>,
    pub wh: Mat<R>,
    pub b: Mat<R>,
    pub input_size: usize,
    pub shortcut_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
}

impl<R: FloatScalar> ShortcutRnn<R> {
    pub fn new(input_size: usize, shortcut_size: usize, hidden_size: usize) -> Result<Self> {
        Self::new_with_output(input_size, shortcut_size, hidden_size, hidden_size)
    }

    pub fn new_with_output(
        input_size: usize,
        shortcut_size: usize,
        hidden_size: usize,
        output_size: usize,
    ) -> Result<Self> {
        let fan_in = input_size + shortcut_size + hidden_size;
        Ok(ShortcutRnn {
            wx: init::fan_in_uniform(output_size, input_size, fan_in)?,
            ws: init::fan_in_uniform(output_size, shortcut_size, fan_in)?,
            wh: init::fan_in_uniform(output_size, hidden_size, fan_in)?,
            b: Mat::zeros(output_size, 1)?,
            input_size,
            shortcut_size,
            hidden_size,
            output_size,
        })
    }

    /// y = Wx·x + Ws·s + Wh·h + b.
    pub fn activate(&self, input: &Mat<R>, shortcut: &Mat<R>, hidden: &Mat<R>) -> Result<Mat<R>> {
        mul_add_mul_with_bias(
            &[(&self.wx, input), (&self.ws, shortcut), (&self.wh, hidden)],
            &self.b,
        )
    }

    pub fn parameters(&self) -> Vec<Mat<R>> {
        vec![
            self.wx.clone(),
            self.ws.clone(),
            self.wh.clone(),
            self.b.clone(),
        ]
    }

    pub fn shadow_copy(&self) -> Result<Self> {
        Ok(ShortcutRnn {
            wx: self.wx.encapsulate()?,
            ws: self.ws.encapsulate()?,
            wh: self.wh.encapsulate()?,
            b: self.b.encapsulate()?,
            input_size: self.input_size,
            shortcut_size: self.shortcut_size,
            hidden_size: self.hidden_size,
            output_size: self.output_size,
        })
    }
}

/// A single-row RNN squeezed through a sigmoid: a per-example scalar gate
/// in (0, 1), used to modulate an input before it enters an LSTM stack.
pub struct GatedInput<R: FloatScalar> {
    pub in_gate: Rnn<R>,
}

impl<R: FloatScalar> GatedInput<R> {
    pub fn new(input_size: usize, hidden_size: usize) -> Result<Self> {
        Ok(GatedInput {
            in_gate: Rnn::new_with_output(input_size, hidden_size, 1)?,
        })
    }

    /// gate = σ(Wx·x + Wh·h + b), shape [1, N].
    pub fn activate(&self, input: &Mat<R>, hidden: &Mat<R>) -> Result<Mat<R>> {
        self.in_gate.activate(input, hidden)?.sigmoid()
    }

    pub fn parameters(&self) -> Vec<Mat<R>> {
        self.in_gate.parameters()
    }

    pub fn shadow_copy(&self) -> Result<Self> {
        Ok(GatedInput {
            in_gate: self.in_gate.shadow_copy()?,
        })
    }
}
