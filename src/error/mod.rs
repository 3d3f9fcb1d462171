use thiserror::Error;

/// Errors that abort a fitting call before any voxel is processed.
///
/// Numerical trouble inside a single voxel fit is not reported here; it ends
/// that voxel with [`crate::FitStatus::Stalled`] and the batch continues.
#[derive(Error, Debug)]
pub enum KinfitError {
    /// A buffer or vector does not have the length its companion inputs imply
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// A lower bound exceeds its upper bound
    #[error("Invalid bounds for parameter {index}: lower = {lower}, upper = {upper}")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    /// Frame timing that cannot describe a scan
    #[error("Invalid frame timing at frame {frame}: {reason}")]
    InvalidTiming { frame: usize, reason: String },

    /// NaN or infinite value in an input buffer
    #[error("Non-finite value in {what} at index {index}")]
    NonFinite { what: &'static str, index: usize },

    /// Invalid scalar input
    #[error("Invalid value for {name}: {value}")]
    InvalidScalar { name: &'static str, value: f64 },

    /// Shape of an input matrix that no broadcasting rule accepts
    #[error("Unsupported shape for {what}: {rows} x {cols} ({reason})")]
    UnsupportedShape {
        what: &'static str,
        rows: usize,
        cols: usize,
        reason: String,
    },

    /// Failure to decode a serialized request
    #[error("Failed to decode request: {0}")]
    Decode(#[from] serde_json::Error),
}

impl KinfitError {
    pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), Self> {
        if expected != found {
            return Err(KinfitError::DimensionMismatch {
                what,
                expected,
                found,
            });
        }
        Ok(())
    }

    pub(crate) fn check_finite<'a>(
        what: &'static str,
        values: impl IntoIterator<Item = &'a f64>,
    ) -> Result<(), Self> {
        match values.into_iter().position(|v| !v.is_finite()) {
            Some(index) => Err(KinfitError::NonFinite { what, index }),
            None => Ok(()),
        }
    }
}
