// char-rnn — Character-level language modelling with Hogwild workers
//
// Trains a stacked LSTM to predict the next character of a UTF-8 corpus.
// Each newline-terminated line is one training example, padded with a
// start symbol (prepad = 0) and an end symbol (postpad = vocab - 1);
// character codes above the vocabulary are clamped.
//
// Several worker threads train simultaneously against the same parameter
// buffers: every worker builds a shadow model (shared weights, private
// gradients), records on its own tape, and lets AdaDelta write updates
// without any locking.
//
// Usage:
//   char-rnn <corpus.txt> [workers] [epochs] [minibatch]

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use marten::model::StackedModel;
use marten::prelude::*;
use marten::tape;

struct Config {
    corpus: String,
    workers: usize,
    epochs: usize,
    minibatch: usize,
    input_size: usize,
    hidden_sizes: Vec<usize>,
    vocab_size: usize,
    report_every: usize,
}

impl Config {
    fn from_args() -> Option<Self> {
        let args: Vec<String> = std::env::args().collect();
        let corpus = args.get(1)?.clone();
        Some(Config {
            corpus,
            workers: args.get(2).and_then(|v| v.parse().ok()).unwrap_or(5),
            epochs: args.get(3).and_then(|v| v.parse().ok()).unwrap_or(2000),
            minibatch: args.get(4).and_then(|v| v.parse().ok()).unwrap_or(20),
            input_size: 5,
            hidden_sizes: vec![20, 20],
            vocab_size: 300,
            report_every: 5,
        })
    }
}

/// One padded, clamped symbol sequence per corpus line.
fn character_sequences(
    path: &str,
    prepad: usize,
    postpad: usize,
    vocab_size: usize,
) -> Result<Vec<Vec<usize>>> {
    let file = File::open(path)
        .map_err(|e| marten::Error::msg(format!("cannot open corpus {}: {}", path, e)))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| marten::Error::msg(format!("corpus read failed: {}", e)))?;
        if line.is_empty() {
            continue;
        }
        let mut symbols = vec![prepad];
        symbols.extend(line.chars().map(|ch| (ch as usize).min(vocab_size - 1)));
        symbols.push(postpad);
        lines.push(symbols);
    }
    Ok(lines)
}

/// Cross-entropy per symbol of a sequence, forward only.
fn sequence_cost(model: &StackedModel<f32>, sequence: &[usize]) -> Result<f32> {
    let _nb = NoBackprop::new();
    let mut states = model.initial_states()?;
    let mut cost = 0.0f32;
    for window in sequence.windows(2) {
        let (next, scores) = model.activate(&states, window[0])?;
        states = next;
        cost += cross_entropy(&scores, &[window[1]])?.scalar_value()?;
    }
    Ok(cost / (sequence.len() - 1) as f32)
}

fn validation_cost(model: &StackedModel<f32>, data: &[Vec<usize>]) -> Result<f32> {
    let mut total = 0.0f32;
    for sequence in data {
        total += sequence_cost(model, sequence)?;
    }
    Ok(total / data.len() as f32)
}

/// Accumulate one sequence's gradients onto the current tape.
fn train_sequence(model: &StackedModel<f32>, sequence: &[usize]) -> Result<()> {
    let mut states = model.initial_states()?;
    for window in sequence.windows(2) {
        let (next, scores) = model.activate(&states, window[0])?;
        states = next;
        let cost = cross_entropy(&scores, &[window[1]])?;
        cost.grad()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let Some(config) = Config::from_args() else {
        eprintln!("usage: char-rnn <corpus.txt> [workers] [epochs] [minibatch]");
        std::process::exit(2);
    };

    let prepad = 0;
    let postpad = config.vocab_size - 1;
    let sentences = character_sequences(&config.corpus, prepad, postpad, config.vocab_size)?;
    if sentences.len() < 10 {
        marten::bail!("corpus has only {} usable lines", sentences.len());
    }
    let train_size = sentences.len() * 9 / 10;
    let (train_set, valid_set) = sentences.split_at(train_size);

    let model = StackedModel::<f32>::new(
        config.vocab_size,
        config.input_size,
        config.vocab_size,
        config.hidden_sizes.clone(),
    )?;

    println!(
        "training on {} sequences ({} held out), {} workers, hidden sizes {:?}",
        train_set.len(),
        valid_set.len(),
        config.workers,
        config.hidden_sizes
    );

    let total_epochs = AtomicUsize::new(0);
    let updates_per_worker = config.epochs / config.workers.max(1) / config.minibatch;

    hogwild::run(config.workers, |_worker| {
        let shadow = model.shadow_copy()?;
        let shadow_params = shadow.parameters();
        let mut solver = AdaDelta::default();
        let mut rng = rand::thread_rng();

        for _ in 0..updates_per_worker.max(1) {
            tape::clear::<f32>();
            for _ in 0..config.minibatch {
                let sequence = &train_set[rng.gen_range(0..train_set.len())];
                train_sequence(&shadow, sequence)?;
            }
            tape::backward::<f32>()?;
            solver.step(&shadow_params, 0.0)?;

            let done = total_epochs.fetch_add(1, Ordering::Relaxed) + 1;
            if done % config.report_every == 0 {
                let cost = validation_cost(&model, valid_set)?;
                println!("epoch ({}) validation cross-entropy = {:8.3}", done, cost);
            }
        }
        Ok(())
    })?;

    let cost = validation_cost(&model, valid_set)?;
    println!("final validation cross-entropy = {:8.3}", cost);

    model.save("char_rnn_params")?;
    println!("parameters saved to char_rnn_params/");
    Ok(())
}
