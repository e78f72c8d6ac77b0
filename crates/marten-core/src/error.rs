/// All errors that can occur within Marten.
///
/// This enum captures every failure mode: shape mismatches, out-of-range
/// indexing, invalid broadcasts, allocation failures, and internal invariant
/// violations. Using a single error type across the workspace simplifies
/// error propagation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation inputs have incompatible shapes (after broadcasting rules).
    #[error("{op}: shape mismatch between {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    /// Index out of bounds on slicing, plucking, or element access.
    #[error("{op}: index {index} out of range for axis {axis} of size {bound}")]
    OutOfRange {
        op: &'static str,
        axis: usize,
        index: isize,
        bound: usize,
    },

    /// `reshape_broadcasted` asked to resize a non-unit, non-broadcast axis.
    #[error("cannot broadcast axis {axis} from size {from} to size {to}")]
    InvalidBroadcast { axis: usize, from: usize, to: usize },

    /// The allocator could not provide a buffer.
    #[error("allocation of {bytes} bytes failed on {device:?}")]
    AllocationFailed {
        device: crate::device::Device,
        bytes: usize,
    },

    /// Operation requested on a device that is not present.
    #[error("device {device:?} is not available")]
    DeviceUnavailable { device: crate::device::Device },

    /// Internal consistency check failed (e.g. freshness flags).
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Marten.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
