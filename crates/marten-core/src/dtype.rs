use std::fmt;

// DType — Supported element types
//
// Every array has a DType that determines its element size and numeric
// behavior. The scalar set is deliberately small: training runs in f32 or
// f64, and i32 covers index arrays and integer test fixtures.

/// Enum of all supported element data types.
///
/// Stored alongside serialized parameters so checkpoints can be validated
/// when they are read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
    I32,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
            DType::I32 => 4,
        }
    }

    /// Whether this dtype is a floating-point type (required for gradients).
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
        };
        write!(f, "{}", s)
    }
}

// Scalar — Trait that connects Rust types to the DType enum
//
// The bridge between Rust's type system and the runtime DType. Generic code
// like `Array<R: Scalar>` gets the element tag, conversions, and the
// per-type process-wide memory bank through this trait.

/// Trait implemented by Rust types that can be stored in an array.
pub trait Scalar:
    Copy + Send + Sync + 'static + PartialEq + PartialOrd + fmt::Debug + fmt::Display + num_traits::NumCast
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    /// The process-wide memory bank for buffers of this element type.
    fn bank() -> &'static crate::bank::MemoryBank<Self>;

    /// The zero value.
    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    /// The one value.
    fn one() -> Self {
        Self::from_f64(1.0)
    }
}

/// Floating-point scalars: the types gradients can flow through.
///
/// Adds the per-thread autodiff tape hook on top of [`Scalar`]. The tape
/// lives in a `thread_local!` slot per element type (see `tape.rs`, where
/// the impls for `f32` and `f64` are found next to those slots).
pub trait FloatScalar: Scalar + num_traits::Float {
    /// Run `f` with this thread's tape for the element type.
    fn with_tape<T>(f: impl FnOnce(&std::cell::RefCell<crate::tape::Tape<Self>>) -> T) -> T;
}

impl Scalar for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn bank() -> &'static crate::bank::MemoryBank<Self> {
        crate::bank::bank_f32()
    }
}

impl Scalar for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn bank() -> &'static crate::bank::MemoryBank<Self> {
        crate::bank::bank_f64()
    }
}

impl Scalar for i32 {
    const DTYPE: DType = DType::I32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i32
    }
    fn bank() -> &'static crate::bank::MemoryBank<Self> {
        crate::bank::bank_i32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_sizes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert_eq!(DType::I32.size_in_bytes(), 4);
    }

    #[test]
    fn dtype_is_float() {
        assert!(DType::F32.is_float());
        assert!(DType::F64.is_float());
        assert!(!DType::I32.is_float());
    }

    #[test]
    fn scalar_roundtrip() {
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(f64::from_f64(42.0).to_f64(), 42.0);
        assert_eq!(i32::from_f64(42.0), 42);
    }
}
