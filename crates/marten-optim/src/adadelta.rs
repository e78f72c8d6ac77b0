use std::collections::HashMap;

use marten_core::{Array, FloatScalar, Mat, Result};

use crate::{clip_elem, Solver};

// AdaDelta — Learning-rate-free adaptive steps
//
//   g  = clip(dw, ±clip) + l2 · w
//   g2 = ρ · g2 + (1 − ρ) · g²
//   Δ  = −g · √(d2 + eps) / √(g2 + eps)
//   d2 = ρ · d2 + (1 − ρ) · Δ²
//   w += Δ
//
// Two caches per parameter: the running squared gradient (g2) and the
// running squared update (d2). The ratio of their roots supplies the
// per-element step size, so there is no global learning rate to tune.

pub struct AdaDelta<R: FloatScalar> {
    pub rho: R,
    pub eps: R,
    pub clip: R,
    grad_sq: HashMap<u64, Array<R>>,
    delta_sq: HashMap<u64, Array<R>>,
}

impl<R: FloatScalar> AdaDelta<R> {
    pub fn new(rho: R, eps: R, clip: R) -> Self {
        AdaDelta {
            rho,
            eps,
            clip,
            grad_sq: HashMap::new(),
            delta_sq: HashMap::new(),
        }
    }

    fn ensure_caches(&mut self, p: &Mat<R>) -> Result<()> {
        if !self.grad_sq.contains_key(&p.id()) {
            self.grad_sq.insert(p.id(), Array::zeros(p.shape())?);
            self.delta_sq.insert(p.id(), Array::zeros(p.shape())?);
        }
        Ok(())
    }
}

impl<R: FloatScalar> Default for AdaDelta<R> {
    /// ρ = 0.95, eps = 1e-6, clip = 5.0.
    fn default() -> Self {
        Self::new(R::from_f64(0.95), R::from_f64(1e-6), R::from_f64(5.0))
    }
}

impl<R: FloatScalar> Solver<R> for AdaDelta<R> {
    fn step(&mut self, params: &[Mat<R>], l2: R) -> Result<()> {
        let rho = self.rho.to_f64();
        let eps = self.eps.to_f64();
        let clip = self.clip.to_f64();
        let l2 = l2.to_f64();

        for p in params {
            self.ensure_caches(p)?;
            let dw = p.dw().to_vec()?;
            let mut w = p.w().to_vec()?;
            let mut g2 = self.grad_sq[&p.id()].to_vec()?;
            let mut d2 = self.delta_sq[&p.id()].to_vec()?;

            for i in 0..w.len() {
                let cur = w[i].to_f64();
                let g = clip_elem(dw[i].to_f64(), clip) + l2 * cur;
                let g2v = rho * g2[i].to_f64() + (1.0 - rho) * g * g;
                g2[i] = R::from_f64(g2v);
                let delta = -g * ((d2[i].to_f64() + eps).sqrt() / (g2v + eps).sqrt());
                d2[i] = R::from_f64(rho * d2[i].to_f64() + (1.0 - rho) * delta * delta);
                w[i] = R::from_f64(cur + delta);
            }

            self.grad_sq[&p.id()].write_values(&g2)?;
            self.delta_sq[&p.id()].write_values(&d2)?;
            p.w().write_values(&w)?;
            p.clear_grad()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_gradient_without_lr() {
        let p = Mat::<f64>::from_vec(2, 1, vec![1.0, -1.0]).unwrap();
        p.dw().write_values(&[1.0, -1.0]).unwrap();
        let mut solver = AdaDelta::default();
        solver.step(&[p.clone()], 0.0).unwrap();
        // positive gradient pushes the weight down, negative up
        assert!(p.at(0, 0).unwrap() < 1.0);
        assert!(p.at(1, 0).unwrap() > -1.0);
        assert_eq!(p.dw().sum().unwrap(), 0.0);
    }

    #[test]
    fn caches_persist_across_steps() {
        let p = Mat::<f64>::from_vec(1, 1, vec![0.0]).unwrap();
        let mut solver = AdaDelta::default();
        p.dw().write_values(&[1.0]).unwrap();
        solver.step(&[p.clone()], 0.0).unwrap();
        let first = solver.grad_sq[&p.id()].to_vec().unwrap()[0];
        p.dw().write_values(&[1.0]).unwrap();
        solver.step(&[p.clone()], 0.0).unwrap();
        let second = solver.grad_sq[&p.id()].to_vec().unwrap()[0];
        assert!(second > first);
    }
}
