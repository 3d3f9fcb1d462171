//! Dual-input liver model.
//!
//! The liver receives arterial blood and portal-venous blood. The portal
//! input is modelled as the plasma curve dispersed through the gut,
//! `cpv = ka * (cp ⊗ exp(-ka t))`, and mixed with the arterial plasma by the
//! arterial fraction `fa`:
//!
//! `cin = fa * cp + (1 - fa) * cpv`
//!
//! Tissue follows a reversible two-tissue compartment model driven by `cin`,
//! whose impulse response is a sum of two exponentials. The measured signal is
//! a whole-blood fraction `vb` on top of tissue:
//!
//! `c = (1 - vb) * (h ⊗ cin) + vb * wb`
//!
//! Parameters, in vector order: `vb, k1, k2, k3, k4, ka, fa`.

use nalgebra::{DMatrix, DVector};

use super::convolution::{exp_conv, exp_conv_with_derivative};
use super::KineticModel;
use crate::data::ScanContext;

const PARAMETER_NAMES: &[&str] = &["vb", "k1", "k2", "k3", "k4", "ka", "fa"];

/// Smallest separation kept between the two tissue eigenvalues
const MIN_SPLIT: f64 = 1e-7;

/// Dual-input (arterial + portal) liver model with a two-tissue compartment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DualInputLiver;

#[derive(Debug, Clone, Copy)]
struct LiverParams {
    vb: f64,
    k1: f64,
    k2: f64,
    k3: f64,
    k4: f64,
    ka: f64,
    fa: f64,
}

impl LiverParams {
    fn from_vector(p: &DVector<f64>) -> Self {
        debug_assert_eq!(p.len(), PARAMETER_NAMES.len());
        Self {
            vb: p[0],
            k1: p[1],
            k2: p[2],
            k3: p[3],
            k4: p[4],
            ka: p[5],
            fa: p[6],
        }
    }
}

/// Tissue impulse response `h(t) = amp[0] exp(-rate[0] t) + amp[1] exp(-rate[1] t)`
/// with derivatives of rates and amplitudes with respect to `k1..k4`.
#[derive(Debug, Clone, Copy)]
struct TissueResponse {
    rate: [f64; 2],
    amp: [f64; 2],
    d_rate: [[f64; 4]; 2],
    d_amp: [[f64; 4]; 2],
}

impl TissueResponse {
    fn new(k1: f64, k2: f64, k3: f64, k4: f64) -> Self {
        let s = k2 + k3 + k4;
        let p = k2 * k4;
        let q = k3 + k4;
        let ds = [0.0, 1.0, 1.0, 1.0];
        let dp = [0.0, k4, 0.0, k2];
        let dq = [0.0, 0.0, 1.0, 1.0];

        let disc = s * s - 4.0 * p;
        let split = if disc > 0.0 { disc.sqrt() } else { 0.0 };
        let floored = split <= MIN_SPLIT;
        let d = if floored { MIN_SPLIT } else { split };
        let dd: [f64; 4] = if floored {
            [0.0; 4]
        } else {
            std::array::from_fn(|i| (s * ds[i] - 2.0 * dp[i]) / d)
        };

        let a2 = 0.5 * (s + d);
        let da2: [f64; 4] = std::array::from_fn(|i| 0.5 * (ds[i] + dd[i]));
        // a1 * a2 = k2 * k4 avoids cancellation when k4 is small
        let (a1, da1): (f64, [f64; 4]) = if !floored && a2 > 0.0 {
            let a1 = p / a2;
            (a1, std::array::from_fn(|i| (dp[i] - a1 * da2[i]) / a2))
        } else {
            (0.5 * (s - d), std::array::from_fn(|i| 0.5 * (ds[i] - dd[i])))
        };

        let g1 = (q - a1) / d;
        let g2 = (a2 - q) / d;
        let dg1: [f64; 4] =
            std::array::from_fn(|i| ((dq[i] - da1[i]) * d - (q - a1) * dd[i]) / (d * d));
        let dg2: [f64; 4] =
            std::array::from_fn(|i| ((da2[i] - dq[i]) * d - (a2 - q) * dd[i]) / (d * d));

        let amp_derivatives = |g: f64, dg: [f64; 4]| -> [f64; 4] {
            std::array::from_fn(|i| if i == 0 { g } else { k1 * dg[i] })
        };

        Self {
            rate: [a1, a2],
            amp: [k1 * g1, k1 * g2],
            d_rate: [da1, da2],
            d_amp: [amp_derivatives(g1, dg1), amp_derivatives(g2, dg2)],
        }
    }
}

/// Hepatic input on the grid and its derivatives with respect to `ka` and `fa`.
struct HepaticInput {
    cin: Vec<f64>,
    d_ka: Vec<f64>,
    d_fa: Vec<f64>,
}

fn hepatic_input(cp: &[f64], ka: f64, fa: f64, step: f64) -> Vec<f64> {
    let z = exp_conv(cp, ka, step);
    cp.iter()
        .zip(z.iter())
        .map(|(c, z)| fa * c + (1.0 - fa) * ka * z)
        .collect()
}

fn hepatic_input_with_derivatives(cp: &[f64], ka: f64, fa: f64, step: f64) -> HepaticInput {
    let (z, dz) = exp_conv_with_derivative(cp, ka, step);
    let n = cp.len();
    let mut cin = Vec::with_capacity(n);
    let mut d_ka = Vec::with_capacity(n);
    let mut d_fa = Vec::with_capacity(n);
    for i in 0..n {
        let cpv = ka * z[i];
        cin.push(fa * cp[i] + (1.0 - fa) * cpv);
        d_ka.push((1.0 - fa) * (z[i] + ka * dz[i]));
        d_fa.push(cp[i] - cpv);
    }
    HepaticInput { cin, d_ka, d_fa }
}

fn tissue_curve(input: &[f64], tissue: &TissueResponse, step: f64) -> Vec<f64> {
    let y1 = exp_conv(input, tissue.rate[0], step);
    let y2 = exp_conv(input, tissue.rate[1], step);
    y1.iter()
        .zip(y2.iter())
        .map(|(a, b)| tissue.amp[0] * a + tissue.amp[1] * b)
        .collect()
}

impl KineticModel for DualInputLiver {
    fn name(&self) -> &'static str {
        "liver"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        PARAMETER_NAMES
    }

    fn evaluate(&self, params: &DVector<f64>, scan: &ScanContext) -> DVector<f64> {
        let p = LiverParams::from_vector(params);
        let step = scan.step();
        let cin = hepatic_input(scan.plasma_grid(), p.ka, p.fa, step);
        let tissue = TissueResponse::new(p.k1, p.k2, p.k3, p.k4);
        let ct = tissue_curve(&cin, &tissue, step);

        let curve: Vec<f64> = ct
            .iter()
            .zip(scan.blood_grid().iter())
            .map(|(c, wb)| (1.0 - p.vb) * c + p.vb * wb)
            .collect();
        scan.frame_average(&curve)
    }

    fn jacobian(&self, params: &DVector<f64>, scan: &ScanContext) -> DMatrix<f64> {
        let p = LiverParams::from_vector(params);
        let step = scan.step();
        let n = scan.grid_len();
        let input = hepatic_input_with_derivatives(scan.plasma_grid(), p.ka, p.fa, step);
        let tissue = TissueResponse::new(p.k1, p.k2, p.k3, p.k4);

        let (y1, dy1) = exp_conv_with_derivative(&input.cin, tissue.rate[0], step);
        let (y2, dy2) = exp_conv_with_derivative(&input.cin, tissue.rate[1], step);
        let tissue_scale = 1.0 - p.vb;

        let mut jac = DMatrix::zeros(scan.num_frames(), PARAMETER_NAMES.len());
        let mut column = vec![0.0; n];

        // vb
        for i in 0..n {
            let ct = tissue.amp[0] * y1[i] + tissue.amp[1] * y2[i];
            column[i] = scan.blood_grid()[i] - ct;
        }
        jac.set_column(0, &scan.frame_average(&column));

        // k1..k4 move the rates and amplitudes of the impulse response
        for j in 0..4 {
            for i in 0..n {
                column[i] = tissue_scale
                    * (tissue.d_amp[0][j] * y1[i]
                        + tissue.amp[0] * dy1[i] * tissue.d_rate[0][j]
                        + tissue.d_amp[1][j] * y2[i]
                        + tissue.amp[1] * dy2[i] * tissue.d_rate[1][j]);
            }
            jac.set_column(j + 1, &scan.frame_average(&column));
        }

        // ka and fa only enter through the hepatic input
        for (j, d_input) in [(5, &input.d_ka), (6, &input.d_fa)] {
            let d_ct = tissue_curve(d_input, &tissue, step);
            for i in 0..n {
                column[i] = tissue_scale * d_ct[i];
            }
            jac.set_column(j, &scan.frame_average(&column));
        }

        jac
    }
}
