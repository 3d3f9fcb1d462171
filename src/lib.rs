//! Voxel-wise kinetic model fitting for dynamic imaging.
//!
//! `kinfit` estimates physiological rate constants from measured
//! time-activity curves (TACs) and blood/plasma input functions. The crate is
//! organised in layers:
//!
//! - [`data`]: frame timing and the immutable [`ScanContext`]
//! - [`model`]: the [`KineticModel`] strategy trait and the
//!   [`DualInputLiver`] model with its analytic Jacobian
//! - [`optimize`]: bounds, fixed/free masks and the bounded
//!   [`LevenbergMarquardt`] solver
//! - [`fitting`]: the voxel batch driver [`fit_voxels`]
//! - [`boundary`]: plain-buffer entry point for host environments
//!
//! # Example
//! ```ignore
//! use kinfit::prelude::*;
//!
//! let timing = FrameTiming::from_durations(&durations)?;
//! let scan = ScanContext::new(timing, plasma, blood, 0.0063, 0.05)?;
//! let context = KineticModelContext::liver(scan);
//! let space = ParameterSpace::from_mask(lower, upper, &mask)?;
//! let maps = fit_voxels(
//!     &context,
//!     &space,
//!     tac.view(),
//!     weights.view(),
//!     initial.view(),
//!     &FitOptions::new(),
//! )?;
//! ```

pub mod boundary;
pub mod data;
pub mod error;
pub mod fitting;
pub mod model;
pub mod optimize;

pub use crate::data::{FrameTiming, ScanContext};
pub use crate::fitting::{fit_voxels, ColumnLayout, FitMaps, FitOptions, VoxelReport};
pub use crate::model::{DualInputLiver, KineticModel, KineticModelContext};
pub use crate::optimize::{FitResult, FitStatus, LevenbergMarquardt, LmSettings, ParameterSpace};
pub use error::KinfitError;

pub mod prelude {
    pub use crate::boundary::{
        decode_and_fit, kfit_liver, DiagnosticSink, FitRequest, FitResponse, InputDecoder,
        JsonDecoder, Matrix, TracingSink,
    };
    pub use crate::data::{FrameTiming, ScanContext};
    pub use crate::fitting::{fit_voxels, FitMaps, FitOptions, VoxelReport};
    pub use crate::model::{DualInputLiver, KineticModel, KineticModelContext};
    pub use crate::optimize::{FitResult, FitStatus, LevenbergMarquardt, LmSettings, ParameterSpace};
    pub use crate::KinfitError;
}
