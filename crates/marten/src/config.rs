use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use marten_core::{Error, Result};

// ConfigMap — Hyperparameter key/value storage
//
// A text-serializable map where each key carries one or more string
// values: `hidden_sizes` maps to ["20", "20"], `vocabulary_size` to
// ["300"], and so on. The file format is one key per line, values
// space-separated after the key, which makes a saved model's settings
// both human-readable and round-trippable:
//
//   hidden_sizes 20 20
//   input_size 5
//   vocabulary_size 300
//
// Keys and values must not contain whitespace.

/// An ordered map from hyperparameter name to its string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl ConfigMap {
    pub fn new() -> Self {
        ConfigMap {
            entries: BTreeMap::new(),
        }
    }

    /// Append one value under a key.
    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(value.to_string());
    }

    /// Replace the values under a key.
    pub fn set(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.entries.insert(key.into(), values);
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    /// The single integer value under a key.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        let vals = self
            .get(key)
            .ok_or_else(|| Error::msg(format!("missing configuration key {:?}", key)))?;
        if vals.len() != 1 {
            return Err(Error::msg(format!(
                "configuration key {:?} has {} values, expected 1",
                key,
                vals.len()
            )));
        }
        vals[0]
            .parse()
            .map_err(|e| Error::msg(format!("configuration key {:?}: {}", key, e)))
    }

    /// All values under a key parsed as integers.
    pub fn get_usize_list(&self, key: &str) -> Result<Vec<usize>> {
        let vals = self
            .get(key)
            .ok_or_else(|| Error::msg(format!("missing configuration key {:?}", key)))?;
        vals.iter()
            .map(|v| {
                v.parse()
                    .map_err(|e| Error::msg(format!("configuration key {:?}: {}", key, e)))
            })
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Write as `key value...` lines.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path).map_err(io_err)?;
        let mut w = BufWriter::new(file);
        for (key, values) in &self.entries {
            write!(w, "{}", key).map_err(io_err)?;
            for v in values {
                write!(w, " {}", v).map_err(io_err)?;
            }
            writeln!(w).map_err(io_err)?;
        }
        Ok(())
    }

    /// Read a file written by `save`. Blank lines are skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(io_err)?;
        let mut out = ConfigMap::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err)?;
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            let values: Vec<String> = parts.map(str::to_string).collect();
            out.set(key, values);
        }
        Ok(out)
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::msg(format!("io error: {}", e))
}
