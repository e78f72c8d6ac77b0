use marten_core::{FloatScalar, Mat, Result};

use crate::Solver;

// Sgd — Plain stochastic gradient descent
//
//   w -= lr · dw + l2 · w
//
// Stateless: no per-parameter accumulators, so it is also the cheapest
// solver for Hogwild workers to carry.

pub struct Sgd<R> {
    pub lr: R,
}

impl<R: FloatScalar> Sgd<R> {
    pub fn new(lr: R) -> Self {
        Sgd { lr }
    }
}

impl<R: FloatScalar> Solver<R> for Sgd<R> {
    fn step(&mut self, params: &[Mat<R>], l2: R) -> Result<()> {
        let lr = self.lr.to_f64();
        let l2 = l2.to_f64();
        for p in params {
            let dw = p.dw().to_vec()?;
            let mut w = p.w().to_vec()?;
            for (wv, g) in w.iter_mut().zip(dw.iter()) {
                let cur = wv.to_f64();
                *wv = R::from_f64(cur - lr * (*g).to_f64() - l2 * cur);
            }
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
    fn moves_against_gradient_and_zeroes_dw() {
        let p = Mat::<f64>::from_vec(2, 1, vec![1.0, -1.0]).unwrap();
        p.dw().write_values(&[0.5, -0.5]).unwrap();
        let mut solver = Sgd::new(0.1);
        solver.step(&[p.clone()], 0.0).unwrap();
        assert!((p.at(0, 0).unwrap() - 0.95).abs() < 1e-12);
        assert!((p.at(1, 0).unwrap() + 0.95).abs() < 1e-12);
        assert_eq!(p.dw().sum().unwrap(), 0.0);
    }

    #[test]
    fn l2_decays_weights() {
        let p = Mat::<f64>::from_vec(1, 1, vec![2.0]).unwrap();
        let mut solver = Sgd::new(0.0);
        solver.step(&[p.clone()], 0.25).unwrap();
        assert!((p.at(0, 0).unwrap() - 1.5).abs() < 1e-12);
    }
}
