use thiserror::Error;

/// Error variants for sampler operations.
///
/// Every variant is raised by argument validation before any state is
/// touched; a failed call leaves the sampler exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum WeightError {
    /// An index outside `1..=len` was passed.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    /// A weight that is NaN, infinite, negative, or subnormal.
    #[error("invalid weight {value} for index {index}: weights must be zero or a positive normal double")]
    InvalidWeight { index: usize, value: f64 },

    /// `resize` on a sampler whose storage policy forbids the new length.
    #[error("sampler storage does not allow resizing to the requested length")]
    NotResizable,

    /// `sample` with every weight zero.
    #[error("cannot sample: all weights are zero")]
    Empty,
}

/// Specialized result type for sampler operations.
pub type Result<T> = std::result::Result<T, WeightError>;
