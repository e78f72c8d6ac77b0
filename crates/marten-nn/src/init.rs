// Parameter initialization utilities
//
// Layers draw their weights from U(-k, k) with k = 1/sqrt(fan_in), the
// standard scaling that keeps activation variance stable through affine
// blocks. The helpers return plain Mats; layers own them from there.

use marten_core::{FloatScalar, Mat, Result};

/// A matrix with entries drawn from U(lo, hi).
pub fn uniform<R: FloatScalar>(rows: usize, cols: usize, lo: f64, hi: f64) -> Result<Mat<R>> {
    Mat::uniform(rows, cols, lo, hi)
}

/// Fan-in scaled uniform init: U(-k, k) with k = 1/sqrt(fan_in).
pub fn fan_in_uniform<R: FloatScalar>(rows: usize, cols: usize, fan_in: usize) -> Result<Mat<R>> {
    let k = 1.0 / (fan_in.max(1) as f64).sqrt();
    Mat::uniform(rows, cols, -k, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_in_bounds() {
        let m = fan_in_uniform::<f64>(30, 25, 25).unwrap();
        let k = 1.0 / 5.0;
        let vals = m.w().to_vec().unwrap();
        assert!(vals.iter().all(|v| v.abs() <= k));
        // not all identical
        assert!(vals.iter().any(|&v| v != vals[0]));
    }
}
