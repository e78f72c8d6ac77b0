use crate::error::{Error, Result};

// Slice — A begin/end/step range along one axis
//
// `begin` and `end` follow Python conventions: negative values count from
// the end of the axis and are resolved when the slice is applied. `end` of
// None means "to the end of the axis". A negative step walks the selected
// range backwards; membership then counts down from `end - 1`, so
// Slice(0, 12, -2) selects 11, 9, 7, 5, 3, 1.

/// A half-open range with a step, applied to one axis of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub begin: isize,
    pub end: Option<isize>,
    pub step: isize,
}

impl Slice {
    /// Range `[begin, end)` with step 1.
    pub fn new(begin: isize, end: isize) -> Self {
        Slice {
            begin,
            end: Some(end),
            step: 1,
        }
    }

    /// Range `[begin, end)` with an explicit step. Step 0 is an error.
    pub fn with_step(begin: isize, end: isize, step: isize) -> Result<Self> {
        if step == 0 {
            return Err(Error::msg("slice step cannot be 0"));
        }
        Ok(Slice {
            begin,
            end: Some(end),
            step,
        })
    }

    /// The whole axis.
    pub fn all() -> Self {
        Slice {
            begin: 0,
            end: None,
            step: 1,
        }
    }

    /// Resolve `begin`/`end` against an axis of size `dim`.
    /// Returns absolute `(begin, end)` with `0 <= begin < end <= dim`.
    pub fn normalize(&self, dim: usize) -> Result<(usize, usize)> {
        let dim_i = dim as isize;
        let b = if self.begin < 0 {
            self.begin + dim_i
        } else {
            self.begin
        };
        let e = match self.end {
            None => dim_i,
            Some(e) if e < 0 => e + dim_i,
            Some(e) => e,
        };
        if b < 0 || e > dim_i || b >= e {
            return Err(Error::OutOfRange {
                op: "slice",
                axis: 0,
                index: if b < 0 { self.begin } else { e },
                bound: dim,
            });
        }
        Ok((b as usize, e as usize))
    }

    /// Number of selected elements: `ceil((end - begin) / |step|)`.
    /// Requires non-negative, resolved bounds.
    pub fn size(&self) -> Result<usize> {
        let e = self
            .end
            .ok_or_else(|| Error::msg("slice size requires a concrete end"))?;
        if self.begin < 0 || e < self.begin {
            return Err(Error::msg("slice size requires resolved bounds"));
        }
        let span = (e - self.begin) as usize;
        let step = self.step.unsigned_abs();
        Ok(span.div_ceil(step))
    }

    /// Whether index `i` is selected. For a positive step, selection counts
    /// up from `begin`; for a negative step it counts down from `end - 1`.
    pub fn contains(&self, i: isize) -> Result<bool> {
        let e = self
            .end
            .ok_or_else(|| Error::msg("slice contains requires a concrete end"))?;
        if i < self.begin || i >= e {
            return Ok(false);
        }
        let step = self.step.unsigned_abs() as isize;
        Ok(if self.step > 0 {
            (i - self.begin) % step == 0
        } else {
            (e - 1 - i) % step == 0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_size() {
        assert_eq!(5, Slice::new(0, 5).size().unwrap());
        assert_eq!(2, Slice::new(2, 4).size().unwrap());
        assert_eq!(3, Slice::with_step(0, 5, 2).unwrap().size().unwrap());
        assert_eq!(3, Slice::with_step(0, 5, -2).unwrap().size().unwrap());
        assert_eq!(2, Slice::with_step(0, 6, 3).unwrap().size().unwrap());
        assert_eq!(2, Slice::with_step(0, 6, -3).unwrap().size().unwrap());
        assert_eq!(3, Slice::with_step(0, 7, 3).unwrap().size().unwrap());
        assert_eq!(3, Slice::with_step(0, 7, -3).unwrap().size().unwrap());

        assert!(Slice::with_step(0, 2, 0).is_err());
    }

    #[test]
    fn slice_contains() {
        let up = Slice::with_step(0, 12, 2).unwrap();
        assert!(up.contains(0).unwrap());
        assert!(!up.contains(1).unwrap());

        let down = Slice::with_step(0, 12, -2).unwrap();
        assert!(!down.contains(0).unwrap());
        assert!(down.contains(1).unwrap());
        assert!(down.contains(11).unwrap());
        assert!(!down.contains(12).unwrap());
    }

    #[test]
    fn normalize_handles_negative_bounds() {
        let s = Slice::new(0, -1);
        assert_eq!(s.normalize(5).unwrap(), (0, 4));
        let s = Slice::new(-2, 5);
        assert_eq!(s.normalize(5).unwrap(), (3, 5));
        assert!(Slice::new(3, 3).normalize(5).is_err());
        assert!(Slice::new(0, 9).normalize(5).is_err());
    }
}
