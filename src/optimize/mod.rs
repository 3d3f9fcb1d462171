//! Bounded nonlinear least squares.

pub mod bounds;
pub mod lm;

pub use bounds::ParameterSpace;
pub use lm::{weighted_sse, FitResult, FitStatus, LevenbergMarquardt, LmSettings};
