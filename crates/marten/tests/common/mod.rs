#![allow(dead_code)]

use marten::tape;
use marten::{Mat, NoBackprop, Result};

/// Central finite-difference gradient check.
///
/// Runs the functor, seeds the (summed) output gradient, replays the tape,
/// then perturbs every element of every argument by ±eps and compares the
/// numerical slope against the accumulated `dw`, in the infinity norm.
pub fn gradient_same<F>(functor: F, args: &[Mat<f64>], tolerance: f64) -> bool
where
    F: Fn(&[Mat<f64>]) -> Result<Mat<f64>>,
{
    const EPS: f64 = 1e-9;

    tape::clear::<f64>();
    for arg in args {
        arg.clear_grad().unwrap();
    }

    let error = functor(args).unwrap().sum().unwrap();
    error.grad().unwrap();
    tape::backward::<f64>().unwrap();

    // from here on the gradient is purely numerical
    let _nb = NoBackprop::new();

    let mut worked_out = true;
    for arg in args {
        for i in 0..arg.rows() {
            for j in 0..arg.cols() {
                let prev = arg.at(i, j).unwrap();
                arg.set(i, j, prev + EPS).unwrap();
                let obj_positive = functor(args).unwrap().sum().unwrap().scalar_value().unwrap();
                arg.set(i, j, prev - EPS).unwrap();
                let obj_negative = functor(args).unwrap().sum().unwrap().scalar_value().unwrap();
                arg.set(i, j, prev).unwrap();

                let numerical = (obj_positive - obj_negative) / (2.0 * EPS);
                let analytic = arg.dw_at(i, j).unwrap();
                if (numerical - analytic).abs() > tolerance {
                    eprintln!(
                        "gradient mismatch at arg id={} [{}, {}]: analytic={:.6e}, numerical={:.6e}",
                        arg.id(),
                        i,
                        j,
                        analytic,
                        numerical
                    );
                    worked_out = false;
                }
            }
        }
    }
    worked_out
}

/// Max absolute difference between two Mats' values.
pub fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let av = a.w().to_vec().unwrap();
    let bv = b.w().to_vec().unwrap();
    av.iter()
        .zip(bv.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Max absolute difference between two Mats' gradients.
pub fn max_abs_grad_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let av = a.dw().to_vec().unwrap();
    let bv = b.dw().to_vec().unwrap();
    av.iter()
        .zip(bv.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
