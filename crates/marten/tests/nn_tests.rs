mod common;

use common::{gradient_same, max_abs_diff, max_abs_grad_diff};
use marten::nn::{GatedInput, Layer, Lstm, LstmState, Rnn, ShortcutRnn, StackedInputLayer};
use marten::tape;
use marten::Mat;

const NUM_RETRIES: usize = 5;

fn uniform(rows: usize, cols: usize, bound: f64) -> Mat<f64> {
    Mat::uniform(rows, cols, -bound, bound).unwrap()
}

#[test]
fn layer_tanh_gradient() {
    let num_examples = 20;
    let hidden_size = 10;
    let input_size = 5;
    for _ in 0..NUM_RETRIES {
        let x = uniform(input_size, num_examples, 2.0);
        let layer = Layer::<f64>::new(input_size, hidden_size).unwrap();
        let mut params = layer.parameters();
        params.push(x);
        assert!(gradient_same(
            |xs| layer.activate(xs.last().unwrap())?.tanh(),
            &params,
            3e-4
        ));
    }
}

#[test]
fn stacked_layer_tanh_gradient() {
    let num_examples = 20;
    let hidden_size = 10;
    for _ in 0..NUM_RETRIES {
        let a = uniform(5, num_examples, 2.0);
        let b = uniform(8, num_examples, 2.0);
        let c = uniform(12, num_examples, 2.0);
        let layer = StackedInputLayer::<f64>::new(vec![5, 8, 12], hidden_size).unwrap();
        let mut params = layer.parameters();
        params.push(a);
        params.push(b);
        params.push(c);
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                layer.activate(&[&xs[n - 3], &xs[n - 2], &xs[n - 1]])?.tanh()
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn rnn_gradient() {
    for _ in 0..NUM_RETRIES {
        let x = uniform(5, 20, 2.0);
        let h = uniform(10, 20, 2.0);
        let rnn = Rnn::<f64>::new(5, 10).unwrap();
        let mut params = rnn.parameters();
        params.push(x);
        params.push(h);
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                rnn.activate(&xs[n - 2], &xs[n - 1])?.tanh()
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn shortcut_rnn_gradient() {
    for _ in 0..NUM_RETRIES {
        let x = uniform(5, 20, 2.0);
        let s = uniform(8, 20, 2.0);
        let h = uniform(10, 20, 2.0);
        let rnn = ShortcutRnn::<f64>::new(5, 8, 10).unwrap();
        let mut params = rnn.parameters();
        params.push(x);
        params.push(s);
        params.push(h);
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                rnn.activate(&xs[n - 3], &xs[n - 2], &xs[n - 1])?.tanh()
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn gated_input_gradient() {
    for _ in 0..NUM_RETRIES {
        let x = uniform(5, 20, 2.0);
        let h = uniform(10, 20, 2.0);
        let gate = GatedInput::<f64>::new(5, 10).unwrap();
        let mut params = gate.parameters();
        params.push(x.clone());
        params.push(h);
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                let g = gate.activate(&xs[n - 2], &xs[n - 1])?;
                // use the gate the way the stack does: scale the input
                xs[n - 2].eltmul(&g)
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn rnn_gradient_vs_stacked_gradient() {
    // An RNN cell and a stacked-input layer over [input, hidden] are the
    // same affine map; with equal weights they must produce identical
    // activations and identical gradients everywhere.
    let num_examples = 20;
    let hidden_size = 10;
    let input_size = 5;
    for _ in 0..NUM_RETRIES {
        tape::clear::<f64>();

        let x = uniform(input_size, num_examples, 2.0);
        let h = uniform(hidden_size, num_examples, 2.0);
        let x_s = x.deep_copy().unwrap();
        let h_s = h.deep_copy().unwrap();

        let rnn = Rnn::<f64>::new(input_size, hidden_size).unwrap();
        let stacked =
            StackedInputLayer::<f64>::new(vec![input_size, hidden_size], hidden_size).unwrap();

        // same parameters for both layers
        let params = rnn.parameters();
        let stacked_params = stacked.parameters();
        for (p, q) in params.iter().zip(stacked_params.iter()) {
            assert_eq!(p.shape(), q.shape());
            p.w().write_values(&q.w().to_vec().unwrap()).unwrap();
        }

        let error = rnn
            .activate(&x, &h)
            .unwrap()
            .tanh()
            .unwrap()
            .sub_scalar(1.0)
            .unwrap()
            .pow(2.0)
            .unwrap()
            .sum()
            .unwrap();
        error.grad().unwrap();
        let error2 = stacked
            .activate(&[&x_s, &h_s])
            .unwrap()
            .tanh()
            .unwrap()
            .sub_scalar(1.0)
            .unwrap()
            .pow(2.0)
            .unwrap()
            .sum()
            .unwrap();
        error2.grad().unwrap();
        tape::backward::<f64>().unwrap();

        for (p, q) in params.iter().zip(stacked_params.iter()) {
            assert!(max_abs_grad_diff(p, q) < 1e-6);
        }
        assert!(max_abs_grad_diff(&x, &x_s) < 1e-6);
        assert!(max_abs_grad_diff(&h, &h_s) < 1e-6);
    }
}

#[test]
fn lstm_zaremba_gradient() {
    let num_examples = 20;
    let hidden_size = 10;
    let input_size = 5;
    for _ in 0..NUM_RETRIES {
        let x = uniform(input_size, num_examples, 2.0);
        let lstm = Lstm::<f64>::new(input_size, hidden_size, false).unwrap();
        let state = LstmState::zeros(hidden_size).unwrap();
        let mut params = lstm.parameters();
        params.push(x.clone());
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                Ok(lstm.activate(&xs[n - 1], &state)?.hidden)
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn lstm_graves_gradient() {
    let num_examples = 20;
    let hidden_size = 10;
    let input_size = 5;
    for _ in 0..NUM_RETRIES {
        let x = uniform(input_size, num_examples, 2.0);
        let lstm = Lstm::<f64>::new(input_size, hidden_size, true).unwrap();
        let state = LstmState::zeros(hidden_size).unwrap();
        let mut params = lstm.parameters();
        params.push(x.clone());
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                Ok(lstm.activate(&xs[n - 1], &state)?.hidden)
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn lstm_graves_shortcut_gradient() {
    let num_examples = 20;
    let hidden_size = 10;
    let input_size = 5;
    let shortcut_size = 8;
    for _ in 0..NUM_RETRIES {
        let x = uniform(input_size, num_examples, 2.0);
        let s = uniform(shortcut_size, num_examples, 2.0);
        let lstm = Lstm::<f64>::new_shortcut(input_size, shortcut_size, hidden_size, true).unwrap();
        let state = LstmState::zeros(hidden_size).unwrap();
        let mut params = lstm.parameters();
        params.push(x);
        params.push(s);
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                Ok(lstm
                    .activate_shortcut(&xs[n - 2], &xs[n - 1], &state)?
                    .hidden)
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn lstm_zaremba_shortcut_gradient() {
    let num_examples = 20;
    let hidden_size = 10;
    let input_size = 5;
    let shortcut_size = 8;
    for _ in 0..NUM_RETRIES {
        let x = uniform(input_size, num_examples, 2.0);
        let s = uniform(shortcut_size, num_examples, 2.0);
        let lstm = Lstm::<f64>::new_shortcut(input_size, shortcut_size, hidden_size, false).unwrap();
        let state = LstmState::zeros(hidden_size).unwrap();
        let mut params = lstm.parameters();
        params.push(x);
        params.push(s);
        assert!(gradient_same(
            |xs| {
                let n = xs.len();
                Ok(lstm
                    .activate_shortcut(&xs[n - 2], &xs[n - 1], &state)?
                    .hidden)
            },
            &params,
            3e-4
        ));
    }
}

#[test]
fn graves_and_zaremba_disagree_with_shared_weights() {
    // Same weights on every shared block, zero initial state, same input.
    // The Graves cell's output gate still sees the fresh cell state, so
    // the hidden outputs must differ.
    let input_size = 5;
    let hidden_size = 10;
    let plain = Lstm::<f64>::new(input_size, hidden_size, false).unwrap();
    let graves = Lstm::<f64>::new(input_size, hidden_size, true).unwrap();

    // copy the plain cell's blocks into the graves cell's matching slots
    let copy_block = |src: &StackedInputLayer<f64>, dst: &StackedInputLayer<f64>| {
        for (s, d) in src.matrices.iter().zip(dst.matrices.iter()) {
            d.w().write_values(&s.w().to_vec().unwrap()).unwrap();
        }
        dst.b.w().write_values(&src.b.w().to_vec().unwrap()).unwrap();
    };
    copy_block(&plain.input_gate, &graves.input_gate);
    copy_block(&plain.forget_gate, &graves.forget_gate);
    copy_block(&plain.output_gate, &graves.output_gate);
    copy_block(&plain.cell_write, &graves.cell_write);

    let x = uniform(input_size, 1, 2.0);
    let state = LstmState::zeros(hidden_size).unwrap();
    let out_plain = plain.activate(&x, &state).unwrap();
    let out_graves = graves.activate(&x, &state).unwrap();

    // memories agree (the i/f gates see a zero cell state), hiddens differ
    assert!(max_abs_diff(&out_plain.memory, &out_graves.memory) < 1e-12);
    assert!(max_abs_diff(&out_plain.hidden, &out_graves.hidden) > 1e-8);
    tape::clear::<f64>();
}

#[test]
fn lstm_parameters_are_copyable_between_equal_cells() {
    let a = Lstm::<f64>::new(7, 9, true).unwrap();
    let b = Lstm::<f64>::new(7, 9, true).unwrap();
    let pa = a.parameters();
    let pb = b.parameters();
    assert_eq!(pa.len(), pb.len());
    for (p, q) in pa.iter().zip(pb.iter()) {
        assert_eq!(p.shape(), q.shape());
        q.w().write_values(&p.w().to_vec().unwrap()).unwrap();
    }
    let x = uniform(7, 3, 1.0);
    let state = LstmState::zeros(9).unwrap();
    let out_a = a.activate(&x, &state).unwrap();
    let out_b = b.activate(&x, &state).unwrap();
    assert!(max_abs_diff(&out_a.hidden, &out_b.hidden) < 1e-12);
    tape::clear::<f64>();
}
