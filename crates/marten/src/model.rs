use std::path::Path;

use marten_core::{FloatScalar, Mat, Result};
use marten_nn::{forward_lstms, stacked_cells, Layer, Lstm, LstmState};

use crate::checkpoint;
use crate::config::ConfigMap;

// StackedModel — Embedding + LSTM stack + decoder
//
// The standard recurrent language model shape: a symbol index plucks a row
// from the embedding, the resulting column vector threads through a stack
// of LSTM cells, and the top hidden state is decoded into output scores.
//
//   input index ──row_pluck──▶ [input_size, 1]
//        │ level 0: Lstm(input_size, h₀)
//        │ level k: Lstm(h₍ₖ₋₁₎, hₖ)
//        ▼
//   decoder: Layer(h_last, output_size) ──▶ scores [output_size, 1]
//
// `parameters()` is deterministic (embedding, cells in order, decoder),
// which fixes the checkpoint file layout and lets Hogwild workers pair
// their shadow parameters with the master's.

/// An embedding, a stack of LSTM cells, and a linear decoder.
pub struct StackedModel<R: FloatScalar> {
    pub embedding: Mat<R>,
    pub cells: Vec<Lstm<R>>,
    pub decoder: Layer<R>,
    pub vocabulary_size: usize,
    pub input_size: usize,
    pub output_size: usize,
    pub hidden_sizes: Vec<usize>,
}

impl<R: FloatScalar> StackedModel<R> {
    pub fn new(
        vocabulary_size: usize,
        input_size: usize,
        output_size: usize,
        hidden_sizes: Vec<usize>,
    ) -> Result<Self> {
        if hidden_sizes.is_empty() {
            marten_core::bail!("stacked model needs at least one hidden level");
        }
        let embedding = Mat::uniform(vocabulary_size, input_size, -0.1, 0.1)?;
        embedding.set_name("embedding");
        let cells = stacked_cells(input_size, &hidden_sizes, false)?;
        let decoder = Layer::new(*hidden_sizes.last().expect("non-empty"), output_size)?;
        decoder.w.set_name("decoder.w");
        decoder.b.set_name("decoder.b");
        Ok(StackedModel {
            embedding,
            cells,
            decoder,
            vocabulary_size,
            input_size,
            output_size,
            hidden_sizes,
        })
    }

    /// Rebuild a model with the architecture stored in a configuration map.
    pub fn from_configuration(config: &ConfigMap) -> Result<Self> {
        Self::new(
            config.get_usize("vocabulary_size")?,
            config.get_usize("input_size")?,
            config.get_usize("output_size")?,
            config.get_usize_list("hidden_sizes")?,
        )
    }

    /// The architecture hyperparameters as a configuration map.
    pub fn configuration(&self) -> ConfigMap {
        let mut config = ConfigMap::new();
        config.push("vocabulary_size", self.vocabulary_size);
        config.push("input_size", self.input_size);
        config.push("output_size", self.output_size);
        for &h in &self.hidden_sizes {
            config.push("hidden_sizes", h);
        }
        config
    }

    /// Every trainable parameter: embedding, each cell's, the decoder's.
    pub fn parameters(&self) -> Vec<Mat<R>> {
        let mut params = vec![self.embedding.clone()];
        for cell in &self.cells {
            params.extend(cell.parameters());
        }
        params.extend(self.decoder.parameters());
        params
    }

    /// Zero states for every stack level.
    pub fn initial_states(&self) -> Result<Vec<LstmState<R>>> {
        Lstm::initial_states(&self.hidden_sizes)
    }

    /// Consume one symbol: embed it, advance the stack, decode the top
    /// hidden state. Returns the new states and the output scores.
    pub fn activate(
        &self,
        states: &[LstmState<R>],
        index: usize,
    ) -> Result<(Vec<LstmState<R>>, Mat<R>)> {
        let input = self.embedding.row_pluck(index)?;
        let new_states = forward_lstms(&input, states, &self.cells)?;
        let top_hidden = &new_states.last().expect("non-empty stack").hidden;
        let scores = self.decoder.activate(top_hidden)?;
        Ok((new_states, scores))
    }

    /// A Hogwild worker copy: same architecture, every parameter sharing
    /// the master's value buffer with a private gradient.
    pub fn shadow_copy(&self) -> Result<Self> {
        let cells = self
            .cells
            .iter()
            .map(|c| c.shadow_copy())
            .collect::<Result<Vec<_>>>()?;
        Ok(StackedModel {
            embedding: self.embedding.encapsulate()?,
            cells,
            decoder: self.decoder.shadow_copy()?,
            vocabulary_size: self.vocabulary_size,
            input_size: self.input_size,
            output_size: self.output_size,
            hidden_sizes: self.hidden_sizes.clone(),
        })
    }

    /// Save configuration and parameters under a directory.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| marten_core::Error::msg(format!("io error: {}", e)))?;
        self.configuration().save(dir.join("config.txt"))?;
        checkpoint::save_parameters(dir, &self.parameters())
    }

    /// Rebuild a model saved with [`StackedModel::save`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let config = ConfigMap::load(dir.join("config.txt"))?;
        let model = Self::from_configuration(&config)?;
        checkpoint::load_parameters(dir, &model.parameters())?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_order_is_deterministic() {
        let a = StackedModel::<f64>::new(30, 5, 30, vec![8, 8]).unwrap();
        let b = StackedModel::<f64>::new(30, 5, 30, vec![8, 8]).unwrap();
        let pa = a.parameters();
        let pb = b.parameters();
        assert_eq!(pa.len(), pb.len());
        for (x, y) in pa.iter().zip(pb.iter()) {
            assert_eq!(x.shape(), y.shape());
        }
    }

    #[test]
    fn configuration_roundtrip() {
        let model = StackedModel::<f32>::new(40, 6, 40, vec![10, 12]).unwrap();
        let rebuilt = StackedModel::<f32>::from_configuration(&model.configuration()).unwrap();
        assert_eq!(rebuilt.vocabulary_size, 40);
        assert_eq!(rebuilt.hidden_sizes, vec![10, 12]);
        assert_eq!(rebuilt.parameters().len(), model.parameters().len());
    }

    #[test]
    fn activate_advances_states() {
        let model = StackedModel::<f64>::new(20, 4, 20, vec![6]).unwrap();
        let states = model.initial_states().unwrap();
        let (new_states, scores) = model.activate(&states, 3).unwrap();
        assert_eq!(new_states.len(), 1);
        assert_eq!(scores.shape(), &[20, 1]);
        marten_core::tape::clear::<f64>();
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = std::env::temp_dir().join("marten-model-test");
        let model = StackedModel::<f32>::new(25, 4, 25, vec![6]).unwrap();
        model.save(&dir).unwrap();
        let loaded = StackedModel::<f32>::load(&dir).unwrap();
        let p = model.parameters();
        let q = loaded.parameters();
        for (a, b) in p.iter().zip(q.iter()) {
            assert_eq!(a.w().to_vec().unwrap(), b.w().to_vec().unwrap());
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
