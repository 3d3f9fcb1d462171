//! Kinetic model strategies and the context they are evaluated against.
//!
//! A [`KineticModel`] maps a parameter vector to a predicted time-activity
//! curve for every frame of a scan, and supplies the analytic Jacobian of that
//! prediction. The solver only talks to models through this trait, so new
//! compartmental models plug in without touching the optimizer.

pub mod convolution;
pub mod liver;

use nalgebra::{DMatrix, DVector};

use crate::data::ScanContext;

pub use liver::DualInputLiver;

/// Forward model and Jacobian of one kinetic-model variant.
///
/// Implementations must be pure: the same parameters and scan always give the
/// same curve. Both methods return one row per frame.
pub trait KineticModel: Send + Sync + std::fmt::Debug {
    /// Short identifier of the model
    fn name(&self) -> &'static str;

    /// Names of the parameters, in vector order
    fn parameter_names(&self) -> &'static [&'static str];

    /// Number of parameters the model expects
    fn num_params(&self) -> usize {
        self.parameter_names().len()
    }

    /// Predicted frame values for `params`
    fn evaluate(&self, params: &DVector<f64>, scan: &ScanContext) -> DVector<f64>;

    /// Partial derivatives of [`KineticModel::evaluate`], `num_frm x num_params`.
    ///
    /// Columns of parameters held fixed by the caller are still filled; the
    /// solver drops them.
    fn jacobian(&self, params: &DVector<f64>, scan: &ScanContext) -> DMatrix<f64>;
}

/// Everything a voxel fit needs to read: the scan and the chosen model.
///
/// Built once per fitting call and only ever borrowed immutably afterwards,
/// which is what makes the voxel sweep safe to run in parallel.
#[derive(Debug)]
pub struct KineticModelContext {
    scan: ScanContext,
    model: Box<dyn KineticModel>,
}

impl KineticModelContext {
    pub fn new(scan: ScanContext, model: impl KineticModel + 'static) -> Self {
        Self {
            scan,
            model: Box::new(model),
        }
    }

    /// Context for the dual-input liver model
    pub fn liver(scan: ScanContext) -> Self {
        Self::new(scan, DualInputLiver)
    }

    pub fn scan(&self) -> &ScanContext {
        &self.scan
    }

    pub fn model(&self) -> &dyn KineticModel {
        self.model.as_ref()
    }

    pub fn num_frames(&self) -> usize {
        self.scan.num_frames()
    }

    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }

    pub fn evaluate(&self, params: &DVector<f64>) -> DVector<f64> {
        self.model.evaluate(params, &self.scan)
    }

    pub fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        self.model.jacobian(params, &self.scan)
    }
}
