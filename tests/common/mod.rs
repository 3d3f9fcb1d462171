#![allow(dead_code)]

use kinfit::model::convolution::{exp_conv, exp_conv_with_derivative};
use kinfit::prelude::*;
use nalgebra::{DMatrix, DVector};
use ndarray::Array2;

/// F-18 decay constant in 1/min
pub const DECAY_F18: f64 = 0.693147 / 109.77;

/// Liver parameters `vb, k1, k2, k3, k4, ka, fa`
pub const LIVER_TRUTH: [f64; 7] = [0.08, 0.9, 1.1, 0.04, 0.008, 1.6, 0.25];

pub fn durations() -> Vec<f64> {
    let mut d = vec![0.25; 8];
    d.extend(vec![0.5; 6]);
    d.extend(vec![1.0; 5]);
    d.extend(vec![4.0; 6]);
    d
}

/// Plasma input in kBq/ml, t in minutes
pub fn plasma_at(t: f64) -> f64 {
    60.0 * t * (-4.0 * t).exp() + 3.0 * (-0.15 * t).exp() + 1.0 * (-0.01 * t).exp()
}

pub fn scan() -> ScanContext {
    let timing = FrameTiming::from_durations(&durations()).unwrap();
    let mid = timing.mid_times();
    let plasma: Vec<f64> = mid.iter().map(|&t| plasma_at(t)).collect();
    let blood: Vec<f64> = plasma.iter().map(|c| 1.1 * c).collect();
    ScanContext::new(timing, plasma, blood, DECAY_F18, 0.02).unwrap()
}

pub fn liver_context() -> KineticModelContext {
    KineticModelContext::liver(scan())
}

pub fn liver_bounds() -> (Vec<f64>, Vec<f64>) {
    (
        vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        vec![1.0, 5.0, 5.0, 1.0, 0.5, 10.0, 1.0],
    )
}

/// Simulated TACs, one column per parameter vector
pub fn simulate(context: &KineticModelContext, params: &[Vec<f64>]) -> Array2<f64> {
    let mut tac = Array2::zeros((context.num_frames(), params.len()));
    for (j, p) in params.iter().enumerate() {
        let c = context.evaluate(&DVector::from_column_slice(p));
        for k in 0..c.len() {
            tac[[k, j]] = c[k];
        }
    }
    tac
}

/// Columns of `params` as a `num_par x num_vox` matrix
pub fn columns(params: &[Vec<f64>]) -> Array2<f64> {
    let mut out = Array2::zeros((params[0].len(), params.len()));
    for (j, p) in params.iter().enumerate() {
        for (i, v) in p.iter().enumerate() {
            out[[i, j]] = *v;
        }
    }
    out
}

/// Single-tissue model used to exercise a three-parameter strategy:
/// `c = (1 - vb) * k1 * (cp ⊗ exp(-k2 t)) + vb * wb`
#[derive(Debug, Clone, Copy)]
pub struct OneTissue;

impl KineticModel for OneTissue {
    fn name(&self) -> &'static str {
        "one-tissue"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["vb", "k1", "k2"]
    }

    fn evaluate(&self, p: &DVector<f64>, scan: &ScanContext) -> DVector<f64> {
        let y = exp_conv(scan.plasma_grid(), p[2], scan.step());
        let curve: Vec<f64> = y
            .iter()
            .zip(scan.blood_grid())
            .map(|(y, wb)| (1.0 - p[0]) * p[1] * y + p[0] * wb)
            .collect();
        scan.frame_average(&curve)
    }

    fn jacobian(&self, p: &DVector<f64>, scan: &ScanContext) -> DMatrix<f64> {
        let (y, dy) = exp_conv_with_derivative(scan.plasma_grid(), p[2], scan.step());
        let wb = scan.blood_grid();
        let mut jac = DMatrix::zeros(scan.num_frames(), 3);
        let d_vb: Vec<f64> = (0..y.len()).map(|i| wb[i] - p[1] * y[i]).collect();
        let d_k1: Vec<f64> = y.iter().map(|y| (1.0 - p[0]) * y).collect();
        let d_k2: Vec<f64> = dy.iter().map(|dy| (1.0 - p[0]) * p[1] * dy).collect();
        jac.set_column(0, &scan.frame_average(&d_vb));
        jac.set_column(1, &scan.frame_average(&d_k1));
        jac.set_column(2, &scan.frame_average(&d_k2));
        jac
    }
}
