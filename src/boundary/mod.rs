//! Host boundary for the liver fitting entry point.
//!
//! Hosts (array languages, file-based pipelines, services) hand the fitter
//! plain column-major buffers with their shapes, collected in a
//! [`FitRequest`]. How a request is produced is abstracted by
//! [`InputDecoder`]; non-fatal findings about the inputs are reported through
//! a [`DiagnosticSink`]. Nothing in the model or solver code reports
//! diagnostics directly.

use std::sync::Mutex;

use ndarray::{Array2, ArrayView2, ShapeBuilder};
use serde::{Deserialize, Serialize};

use crate::data::{FrameTiming, ScanContext};
use crate::fitting::{fit_voxels, FitOptions, VoxelReport};
use crate::model::KineticModelContext;
use crate::optimize::ParameterSpace;
use crate::KinfitError;

/// Kind of a non-fatal finding about the inputs or the outcome of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Initial parameters were given as a single row
    InitialParameterRow,
    /// Initial parameters have neither one column nor one column per voxel
    InitialParameterShape,
    /// Some voxel fits did not converge
    StalledFits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Receiver of non-fatal diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing` as warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        tracing::warn!(kind = ?diagnostic.kind, "{}", diagnostic.message);
    }
}

/// Keeps diagnostics in memory for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything reported so far
    pub fn take(&self) -> Vec<Diagnostic> {
        match self.diagnostics.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match self.diagnostics.lock() {
            Ok(mut guard) => guard.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

/// Dense matrix stored column-major, the layout array hosts hand over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, KinfitError> {
        KinfitError::check_len("matrix buffer", rows * cols, data.len())?;
        Ok(Self { rows, cols, data })
    }

    /// Single-column matrix
    pub fn column(data: Vec<f64>) -> Self {
        Self {
            rows: data.len(),
            cols: 1,
            data,
        }
    }

    /// Copy an array into column-major order
    pub fn from_array(array: &Array2<f64>) -> Self {
        let (rows, cols) = array.dim();
        Self {
            rows,
            cols,
            data: array.t().iter().copied().collect(),
        }
    }

    pub fn view(&self, what: &'static str) -> Result<ArrayView2<'_, f64>, KinfitError> {
        ArrayView2::from_shape((self.rows, self.cols).f(), &self.data).map_err(|e| {
            KinfitError::UnsupportedShape {
                what,
                rows: self.rows,
                cols: self.cols,
                reason: e.to_string(),
            }
        })
    }

    /// Element at `row`, `col`
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.data.get(row + col * self.rows).copied()
        } else {
            None
        }
    }
}

/// Inputs of a liver fit as plain buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRequest {
    /// Measured TACs, `num_frm x num_vox`
    pub tac: Matrix,
    /// Weights, `num_frm x 1` or `num_frm x num_vox`
    pub weights: Matrix,
    /// Frame start and end times (`num_frm x 2`) or durations (`num_frm x 1`)
    pub scan_time: Matrix,
    /// Plasma input, one sample per frame
    pub plasma: Vec<f64>,
    /// Whole-blood input, one sample per frame
    pub blood: Vec<f64>,
    pub decay_constant: f64,
    /// Initial parameters, `num_par x 1` or `num_par x num_vox`
    pub initial: Matrix,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Non-zero entries mark free parameters
    pub mask: Vec<f64>,
    pub max_iterations: usize,
    /// Integration step of the model's time grid
    pub step: f64,
    /// Solver settings and scheduling; `max_iterations` above takes precedence
    #[serde(default)]
    pub options: FitOptions,
}

/// Outputs of a liver fit as plain buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResponse {
    /// Estimated parameters, `num_par x num_vox`
    pub params: Matrix,
    /// Fitted curves, `num_frm x num_vox`
    pub curves: Matrix,
    pub reports: Vec<VoxelReport>,
}

/// Source of a [`FitRequest`].
pub trait InputDecoder {
    fn decode(&self) -> Result<FitRequest, KinfitError>;
}

/// Decodes a request from its JSON representation.
#[derive(Debug, Clone, Copy)]
pub struct JsonDecoder<'a> {
    source: &'a str,
}

impl<'a> JsonDecoder<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }
}

impl InputDecoder for JsonDecoder<'_> {
    fn decode(&self) -> Result<FitRequest, KinfitError> {
        Ok(serde_json::from_str(self.source)?)
    }
}

fn frame_timing(scan_time: &Matrix, num_frm: usize) -> Result<FrameTiming, KinfitError> {
    KinfitError::check_len("scan timing rows", num_frm, scan_time.rows)?;
    match scan_time.cols {
        2 => FrameTiming::from_column_major(&scan_time.data, num_frm),
        1 => FrameTiming::from_durations(&scan_time.data),
        cols => Err(KinfitError::UnsupportedShape {
            what: "scan timing",
            rows: scan_time.rows,
            cols,
            reason: "expected start/end columns or a single duration column".to_string(),
        }),
    }
}

/// Fit the dual-input liver model to every voxel of a request.
///
/// Shape problems with the initial parameters are reported to `sink` before
/// the request is rejected or the fit proceeds; all other structural problems
/// are returned as errors without running any fit.
pub fn kfit_liver(
    request: &FitRequest,
    sink: &dyn DiagnosticSink,
) -> Result<FitResponse, KinfitError> {
    let num_frm = request.tac.rows;
    let num_vox = request.tac.cols;
    let num_par = request.initial.rows;
    let initial_cols = request.initial.cols;

    if num_par == 1 {
        sink.report(Diagnostic {
            kind: DiagnosticKind::InitialParameterRow,
            message: "initial parameters should be a column vector or a matrix".to_string(),
        });
    }
    if initial_cols != 1 && initial_cols != num_vox {
        sink.report(Diagnostic {
            kind: DiagnosticKind::InitialParameterShape,
            message: format!(
                "initial parameters have {} columns, expected 1 or {}",
                initial_cols, num_vox
            ),
        });
    }

    let timing = frame_timing(&request.scan_time, num_frm)?;
    let scan = ScanContext::new(
        timing,
        request.plasma.clone(),
        request.blood.clone(),
        request.decay_constant,
        request.step,
    )?;
    let context = KineticModelContext::liver(scan);
    let space =
        ParameterSpace::from_mask(request.lower.clone(), request.upper.clone(), &request.mask)?;
    let options = request
        .options
        .clone()
        .with_max_iterations(request.max_iterations);

    let maps = fit_voxels(
        &context,
        &space,
        request.tac.view("TAC")?,
        request.weights.view("weights")?,
        request.initial.view("initial parameters")?,
        &options,
    )?;

    let stalled = maps.num_stalled();
    if stalled > 0 {
        sink.report(Diagnostic {
            kind: DiagnosticKind::StalledFits,
            message: format!("{} of {} voxel fits did not converge", stalled, num_vox),
        });
    }

    Ok(FitResponse {
        params: Matrix::from_array(maps.params()),
        curves: Matrix::from_array(maps.curves()),
        reports: maps.reports().to_vec(),
    })
}

/// Decode a request and fit it with [`kfit_liver`].
pub fn decode_and_fit(
    decoder: &impl InputDecoder,
    sink: &dyn DiagnosticSink,
) -> Result<FitResponse, KinfitError> {
    let request = decoder.decode()?;
    kfit_liver(&request, sink)
}
