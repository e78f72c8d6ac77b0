use marten_core::{FloatScalar, Mat, Result};

use crate::layer::StackedInputLayer;

// LSTM — Long short-term memory cell
//
// Four affine blocks gate the flow of information through a persistent
// cell state:
//
//   i  = σ(W_i · inputs)        input modulation
//   f  = σ(W_f · inputs)        forget gate
//   o  = σ(W_o · inputs)        output gate
//   g  = tanh(W_g · inputs)     cell write
//   c' = f ⊙ c + i ⊙ g
//   h' = o ⊙ tanh(c')
//
// Each block is a StackedInputLayer over the cell's input list, which keeps
// one implementation across all the variants:
//
//   - plain:            inputs = (x, h)
//   - shortcut:         inputs = (x, s, h)   s from a lower stack level
//   - memory_feeds_gates: the i and f gates additionally see the previous
//     cell state, and the o gate sees the freshly written one
//
// The cell state in a fresh sequence is a [hidden, 1] zero column; batched
// activations broadcast it across the example columns.

/// The recurrent state of one LSTM level: cell memory and hidden output.
pub struct LstmState<R: FloatScalar> {
    pub memory: Mat<R>,
    pub hidden: Mat<R>,
}

impl<R: FloatScalar> Clone for LstmState<R> {
    fn clone(&self) -> Self {
        LstmState {
            memory: self.memory.clone(),
            hidden: self.hidden.clone(),
        }
    }
}

impl<R: FloatScalar> LstmState<R> {
    /// Zero state for a cell of the given hidden size.
    pub fn zeros(hidden_size: usize) -> Result<Self> {
        Ok(LstmState {
            memory: Mat::zeros(hidden_size, 1)?,
            hidden: Mat::zeros(hidden_size, 1)?,
        })
    }
}

/// An LSTM cell, optionally with a shortcut input and Graves-style gate
/// feeding.
pub struct Lstm<R: FloatScalar> {
    pub input_gate: StackedInputLayer<R>,
    pub forget_gate: StackedInputLayer<R>,
    pub output_gate: StackedInputLayer<R>,
    pub cell_write: StackedInputLayer<R>,
    pub input_size: usize,
    pub shortcut_size: Option<usize>,
    pub hidden_size: usize,
    pub memory_feeds_gates: bool,
}

impl<R: FloatScalar> Lstm<R> {
    pub fn new(input_size: usize, hidden_size: usize, memory_feeds_gates: bool) -> Result<Self> {
        Self::build(input_size, None, hidden_size, memory_feeds_gates)
    }

    /// A cell whose four blocks also consume a shortcut input `s`.
    pub fn new_shortcut(
        input_size: usize,
        shortcut_size: usize,
        hidden_size: usize,
        memory_feeds_gates: bool,
    ) -> Result<Self> {
        Self::build(input_size, Some(shortcut_size), hidden_size, memory_feeds_gates)
    }

    fn build(
        input_size: usize,
        shortcut_size: Option<usize>,
        hidden_size: usize,
        memory_feeds_gates: bool,
    ) -> Result<Self> {
        let mut base = vec![input_size];
        if let Some(s) = shortcut_size {
            base.push(s);
        }
        base.push(hidden_size);

        // i, f, o read the cell state in the Graves variant; g never does
        let mut gated = base.clone();
        if memory_feeds_gates {
            gated.push(hidden_size);
        }

        Ok(Lstm {
            input_gate: StackedInputLayer::new(gated.clone(), hidden_size)?,
            forget_gate: StackedInputLayer::new(gated.clone(), hidden_size)?,
            output_gate: StackedInputLayer::new(gated, hidden_size)?,
            cell_write: StackedInputLayer::new(base, hidden_size)?,
            input_size,
            shortcut_size,
            hidden_size,
            memory_feeds_gates,
        })
    }

    /// One step of the plain cell. Errors if this cell was built with a
    /// shortcut input.
    pub fn activate(&self, x: &Mat<R>, state: &LstmState<R>) -> Result<LstmState<R>> {
        if self.shortcut_size.is_some() {
            marten_core::bail!("shortcut LSTM requires activate_shortcut");
        }
        self.step(x, None, state)
    }

    /// One step of the shortcut cell.
    pub fn activate_shortcut(
        &self,
        x: &Mat<R>,
        shortcut: &Mat<R>,
        state: &LstmState<R>,
    ) -> Result<LstmState<R>> {
        if self.shortcut_size.is_none() {
            marten_core::bail!("plain LSTM has no shortcut input");
        }
        self.step(x, Some(shortcut), state)
    }

    fn step(
        &self,
        x: &Mat<R>,
        shortcut: Option<&Mat<R>>,
        state: &LstmState<R>,
    ) -> Result<LstmState<R>> {
        let mut base: Vec<&Mat<R>> = vec![x];
        if let Some(s) = shortcut {
            base.push(s);
        }
        base.push(&state.hidden);

        let mut gate_inputs = base.clone();
        if self.memory_feeds_gates {
            gate_inputs.push(&state.memory);
        }

        let input_gate = self.input_gate.activate(&gate_inputs)?.sigmoid()?;
        let forget_gate = self.forget_gate.activate(&gate_inputs)?.sigmoid()?;
        let cell_write = self.cell_write.activate(&base)?.tanh()?;

        // c' = f ⊙ c + i ⊙ g
        let memory = forget_gate
            .eltmul(&state.memory)?
            .add(&input_gate.eltmul(&cell_write)?)?;

        // the output gate sees the new cell state in the Graves variant
        let mut out_inputs = base;
        if self.memory_feeds_gates {
            out_inputs.push(&memory);
        }
        let output_gate = self.output_gate.activate(&out_inputs)?.sigmoid()?;

        // h' = o ⊙ tanh(c')
        let hidden = output_gate.eltmul(&memory.tanh()?)?;

        Ok(LstmState { memory, hidden })
    }

    /// Parameters of all four blocks, gate order fixed.
    pub fn parameters(&self) -> Vec<Mat<R>> {
        let mut params = self.input_gate.parameters();
        params.extend(self.forget_gate.parameters());
        params.extend(self.output_gate.parameters());
        params.extend(self.cell_write.parameters());
        params
    }

    pub fn shadow_copy(&self) -> Result<Self> {
        Ok(Lstm {
            input_gate: self.input_gate.shadow_copy()?,
            forget_gate: self.forget_gate.shadow_copy()?,
            output_gate: self.output_gate.shadow_copy()?,
            cell_write: self.cell_write.shadow_copy()?,
            input_size: self.input_size,
            shortcut_size: self.shortcut_size,
            hidden_size: self.hidden_size,
            memory_feeds_gates: self.memory_feeds_gates,
        })
    }

    /// Zero states for a stack with the given hidden sizes.
    pub fn initial_states(hidden_sizes: &[usize]) -> Result<Vec<LstmState<R>>> {
        hidden_sizes.iter().map(|&h| LstmState::zeros(h)).collect()
    }
}

/// Build a stack of plain cells where level k feeds level k+1.
pub fn stacked_cells<R: FloatScalar>(
    input_size: usize,
    hidden_sizes: &[usize],
    memory_feeds_gates: bool,
) -> Result<Vec<Lstm<R>>> {
    let mut cells = Vec::with_capacity(hidden_sizes.len());
    let mut prev = input_size;
    for &h in hidden_sizes {
        cells.push(Lstm::new(prev, h, memory_feeds_gates)?);
        prev = h;
    }
    Ok(cells)
}

/// Thread an input through a stack of cells: level k's hidden output is
/// level k+1's input. Returns the new state of every level.
pub fn forward_lstms<R: FloatScalar>(
    input: &Mat<R>,
    states: &[LstmState<R>],
    cells: &[Lstm<R>],
) -> Result<Vec<LstmState<R>>> {
    if states.len() != cells.len() {
        marten_core::bail!(
            "stack of {} cells given {} states",
            cells.len(),
            states.len()
        );
    }
    let mut out = Vec::with_capacity(cells.len());
    let mut layer_input = input.clone();
    for (cell, state) in cells.iter().zip(states.iter()) {
        let next = cell.activate(&layer_input, state)?;
        layer_input = next.hidden.clone();
        out.push(next);
    }
    Ok(out)
}
