//! Voxel-wise batch fitting.
//!
//! [`fit_voxels`] applies the Levenberg-Marquardt solver independently to
//! every column of a TAC matrix and collects the results into a parameter
//! map and a fitted-curve map. Matrices are laid out with one column per
//! voxel, so a voxel's TAC, weights, initial guess and outputs are all the
//! `j`-th column of their respective arrays.
//!
//! # Example
//! ```ignore
//! use kinfit::prelude::*;
//!
//! let context = KineticModelContext::liver(scan);
//! let space = ParameterSpace::from_mask(lower, upper, &[1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0])?;
//! let maps = fit_voxels(
//!     &context,
//!     &space,
//!     tac.view(),
//!     weights.view(),
//!     initial.view(),
//!     &FitOptions::new().with_max_iterations(50).with_progress(),
//! )?;
//! ```

mod progress;

use nalgebra::DVector;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::KineticModelContext;
use crate::optimize::{FitResult, FitStatus, LevenbergMarquardt, LmSettings, ParameterSpace};
use crate::KinfitError;

/// Options for a batch fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Solver settings applied to every voxel
    pub settings: LmSettings,
    /// Fit voxels on the rayon thread pool
    pub parallel: bool,
    /// Show a progress bar on stderr
    pub show_progress: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            settings: LmSettings::default(),
            parallel: true,
            show_progress: false,
        }
    }
}

impl FitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: LmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.settings.max_iterations = max_iterations;
        self
    }

    /// Fit voxels one after another on the calling thread
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Fit voxels in parallel
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }
}

/// Whether an input matrix holds one column shared by all voxels or one per voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLayout {
    Shared,
    PerVoxel,
}

impl ColumnLayout {
    /// Decide the layout of a matrix with `cols` columns for `num_vox` voxels.
    pub fn resolve(
        what: &'static str,
        rows: usize,
        cols: usize,
        num_vox: usize,
    ) -> Result<Self, KinfitError> {
        if cols == num_vox {
            Ok(ColumnLayout::PerVoxel)
        } else if cols == 1 {
            Ok(ColumnLayout::Shared)
        } else {
            Err(KinfitError::UnsupportedShape {
                what,
                rows,
                cols,
                reason: format!("expected 1 or {} columns", num_vox),
            })
        }
    }

    /// Column that holds the data of voxel `voxel`
    pub fn column(&self, voxel: usize) -> usize {
        match self {
            ColumnLayout::Shared => 0,
            ColumnLayout::PerVoxel => voxel,
        }
    }
}

/// Summary of one voxel's fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelReport {
    pub status: FitStatus,
    pub sse: f64,
    pub iterations: usize,
}

impl From<&FitResult> for VoxelReport {
    fn from(result: &FitResult) -> Self {
        Self {
            status: result.status(),
            sse: result.sse(),
            iterations: result.iterations(),
        }
    }
}

/// Parameter and fitted-curve maps of a batch fit.
#[derive(Debug, Clone)]
pub struct FitMaps {
    params: Array2<f64>,
    curves: Array2<f64>,
    reports: Vec<VoxelReport>,
}

impl FitMaps {
    /// Fitted parameters, `num_par x num_vox`
    pub fn params(&self) -> &Array2<f64> {
        &self.params
    }

    /// Fitted curves, `num_frm x num_vox`
    pub fn curves(&self) -> &Array2<f64> {
        &self.curves
    }

    pub fn reports(&self) -> &[VoxelReport] {
        &self.reports
    }

    pub fn num_voxels(&self) -> usize {
        self.reports.len()
    }

    /// Number of voxels whose fit stalled
    pub fn num_stalled(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| !r.status.is_success())
            .count()
    }

    pub fn into_parts(self) -> (Array2<f64>, Array2<f64>) {
        (self.params, self.curves)
    }
}

fn to_vector(column: ArrayView1<f64>) -> DVector<f64> {
    DVector::from_iterator(column.len(), column.iter().copied())
}

/// Fit every voxel of `tac`.
///
/// # Parameters
/// - `context`: scan and model, shared by all voxels
/// - `space`: bounds and free mask
/// - `tac`: measurements, `num_frm x num_vox`
/// - `weights`: frame weights, `num_frm x 1` (shared) or `num_frm x num_vox`
/// - `initial`: starting parameters, `num_par x 1` (shared) or `num_par x num_vox`
/// - `options`: solver settings and scheduling
///
/// # Errors
/// Returns an error before any voxel is fitted when the shapes are not
/// consistent with each other, with the model, or when weights or initial
/// values are not finite or weights are negative. Voxels whose fit stalls are
/// reported through [`FitMaps::reports`] instead.
pub fn fit_voxels(
    context: &KineticModelContext,
    space: &ParameterSpace,
    tac: ArrayView2<f64>,
    weights: ArrayView2<f64>,
    initial: ArrayView2<f64>,
    options: &FitOptions,
) -> Result<FitMaps, KinfitError> {
    let num_frm = context.num_frames();
    let num_par = context.num_params();
    let (tac_rows, num_vox) = tac.dim();

    KinfitError::check_len("TAC rows", num_frm, tac_rows)?;
    KinfitError::check_len("weight rows", num_frm, weights.nrows())?;
    KinfitError::check_len("initial parameter rows", num_par, initial.nrows())?;
    space.check_num_params(num_par)?;

    let weight_layout =
        ColumnLayout::resolve("weights", weights.nrows(), weights.ncols(), num_vox)?;
    let initial_layout =
        ColumnLayout::resolve("initial parameters", initial.nrows(), initial.ncols(), num_vox)?;

    KinfitError::check_finite("weights", weights.iter())?;
    KinfitError::check_finite("initial parameters", initial.iter())?;
    if let Some(&w) = weights.iter().find(|&&w| w < 0.0) {
        return Err(KinfitError::InvalidScalar {
            name: "weight",
            value: w,
        });
    }

    let mut params = Array2::zeros((num_par, num_vox));
    let mut curves = Array2::zeros((num_frm, num_vox));

    tracing::debug!(
        model = context.model().name(),
        num_vox,
        num_frm,
        num_par,
        num_free = space.num_free(),
        "Fitting voxels"
    );

    let solver = LevenbergMarquardt::new(context, space, &options.settings);
    let progress = options.show_progress.then(|| progress::voxel_progress(num_vox));

    let fit_one = |j: usize| -> Result<FitResult, KinfitError> {
        let y = to_vector(tac.column(j));
        let w = to_vector(weights.column(weight_layout.column(j)));
        let p0 = to_vector(initial.column(initial_layout.column(j)));
        let result = solver.fit(&y, &w, &p0)?;
        if result.status() == FitStatus::Stalled {
            tracing::debug!(voxel = j, sse = result.sse(), "Fit stalled");
        }
        if let Some(bar) = &progress {
            bar.inc(1);
        }
        Ok(result)
    };

    let results: Vec<FitResult> = if options.parallel {
        (0..num_vox).into_par_iter().map(fit_one).collect::<Result<_, _>>()?
    } else {
        (0..num_vox).map(fit_one).collect::<Result<_, _>>()?
    };

    if let Some(bar) = progress {
        bar.finish();
    }

    let mut reports = Vec::with_capacity(num_vox);
    for (j, result) in results.iter().enumerate() {
        params
            .column_mut(j)
            .assign(&ArrayView1::from(result.params().as_slice()));
        curves
            .column_mut(j)
            .assign(&ArrayView1::from(result.curve().as_slice()));
        reports.push(VoxelReport::from(result));
    }

    let maps = FitMaps {
        params,
        curves,
        reports,
    };
    let stalled = maps.num_stalled();
    if stalled > 0 {
        tracing::debug!(stalled, num_vox, "Voxel fits stalled");
    }
    Ok(maps)
}
