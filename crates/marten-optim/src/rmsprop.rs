use std::collections::HashMap;

use marten_core::{Array, FloatScalar, Mat, Result};

use crate::{clip_elem, Solver};

// RmsProp — Gradient normalization by a running second moment
//
//   g  = clip(dw, ±clip)
//   g2 = decay · g2 + (1 − decay) · g²
//   w -= lr · g / (√g2 + eps) + l2 · w
//
// Clipping happens before the cache update, so one exploding minibatch
// cannot poison the running estimate.

pub struct RmsProp<R: FloatScalar> {
    pub lr: R,
    pub decay: R,
    pub eps: R,
    pub clip: R,
    grad_sq: HashMap<u64, Array<R>>,
}

impl<R: FloatScalar> RmsProp<R> {
    pub fn new(lr: R, decay: R, eps: R, clip: R) -> Self {
        RmsProp {
            lr,
            decay,
            eps,
            clip,
            grad_sq: HashMap::new(),
        }
    }

    /// The customary defaults: decay 0.999, eps 1e-9, clip 5.0.
    pub fn with_lr(lr: R) -> Self {
        Self::new(
            lr,
            R::from_f64(0.999),
            R::from_f64(1e-9),
            R::from_f64(5.0),
        )
    }

    /// The squared-gradient cache for a parameter, created on first touch.
    fn cache(&mut self, p: &Mat<R>) -> Result<&Array<R>> {
        if !self.grad_sq.contains_key(&p.id()) {
            self.grad_sq.insert(p.id(), Array::zeros(p.shape())?);
        }
        Ok(&self.grad_sq[&p.id()])
    }
}

impl<R: FloatScalar> Solver<R> for RmsProp<R> {
    fn step(&mut self, params: &[Mat<R>], l2: R) -> Result<()> {
        let lr = self.lr.to_f64();
        let decay = self.decay.to_f64();
        let eps = self.eps.to_f64();
        let clip = self.clip.to_f64();
        let l2 = l2.to_f64();

        for p in params {
            let dw = p.dw().to_vec()?;
            let mut w = p.w().to_vec()?;
            let cache = self.cache(p)?;
            let mut g2 = cache.to_vec()?;

            for i in 0..w.len() {
                let g = clip_elem(dw[i].to_f64(), clip);
                let v = decay * g2[i].to_f64() + (1.0 - decay) * g * g;
                g2[i] = R::from_f64(v);
                let cur = w[i].to_f64();
                w[i] = R::from_f64(cur - lr * g / (v.sqrt() + eps) - l2 * cur);
            }

            cache.write_values(&g2)?;
            p.w().write_values(&w)?;
            p.clear_grad()?;
        }
        Ok(())
    }
}
