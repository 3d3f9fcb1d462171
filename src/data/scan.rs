//! Scan description shared by every voxel fit.
//!
//! A [`ScanContext`] holds the frame timing, the decay constant and the two
//! input curves of one dynamic scan. On construction the frame-aligned input
//! samples are resampled onto a uniform fine grid with spacing `step`, which
//! is where the kinetic models evaluate their convolutions. Model output on the
//! grid is mapped back to frames with [`ScanContext::frame_average`].

use nalgebra::DVector;

use crate::data::FrameTiming;
use crate::KinfitError;

/// Upper limit on the number of fine grid intervals for a single scan
const MAX_GRID_INTERVALS: usize = 10_000_000;

/// Position of a time point on the fine grid: interval index and offset into it
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridLocation {
    index: usize,
    offset: f64,
}

/// Immutable scan-level inputs and their fine-grid representation.
#[derive(Debug, Clone)]
pub struct ScanContext {
    timing: FrameTiming,
    decay_constant: f64,
    plasma: Vec<f64>,
    blood: Vec<f64>,
    step: f64,
    grid_times: Vec<f64>,
    plasma_grid: Vec<f64>,
    blood_grid: Vec<f64>,
    decay_grid: Vec<f64>,
    frames: Vec<(GridLocation, GridLocation)>,
}

impl ScanContext {
    /// Build the scan context.
    ///
    /// # Parameters
    /// - `timing`: frame start and end times
    /// - `plasma`: plasma input, one decay-corrected sample per frame
    /// - `blood`: whole-blood input, one decay-corrected sample per frame
    /// - `decay_constant`: radioactive decay constant in 1/time, zero to disable
    /// - `step`: spacing of the fine integration grid, same time unit as `timing`
    pub fn new(
        timing: FrameTiming,
        plasma: Vec<f64>,
        blood: Vec<f64>,
        decay_constant: f64,
        step: f64,
    ) -> Result<Self, KinfitError> {
        let num_frm = timing.num_frames();
        KinfitError::check_len("plasma input", num_frm, plasma.len())?;
        KinfitError::check_len("whole-blood input", num_frm, blood.len())?;
        KinfitError::check_finite("plasma input", &plasma)?;
        KinfitError::check_finite("whole-blood input", &blood)?;

        if !decay_constant.is_finite() || decay_constant < 0.0 {
            return Err(KinfitError::InvalidScalar {
                name: "decay constant",
                value: decay_constant,
            });
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(KinfitError::InvalidScalar {
                name: "integration step",
                value: step,
            });
        }

        let intervals = ((timing.scan_end() / step).ceil() as usize).max(1);
        if intervals > MAX_GRID_INTERVALS {
            return Err(KinfitError::InvalidScalar {
                name: "integration step",
                value: step,
            });
        }

        let grid_times: Vec<f64> = (0..=intervals).map(|n| n as f64 * step).collect();
        let mid = timing.mid_times();
        let plasma_grid = resample(&mid, &plasma, &grid_times);
        let blood_grid = resample(&mid, &blood, &grid_times);
        let decay_grid = grid_times
            .iter()
            .map(|t| (-decay_constant * t).exp())
            .collect();

        let frames = timing
            .start()
            .iter()
            .zip(timing.end().iter())
            .map(|(&s, &e)| (locate(s, step, intervals), locate(e, step, intervals)))
            .collect();

        Ok(Self {
            timing,
            decay_constant,
            plasma,
            blood,
            step,
            grid_times,
            plasma_grid,
            blood_grid,
            decay_grid,
            frames,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.timing.num_frames()
    }

    pub fn timing(&self) -> &FrameTiming {
        &self.timing
    }

    pub fn decay_constant(&self) -> f64 {
        self.decay_constant
    }

    /// Frame-aligned plasma samples as supplied
    pub fn plasma(&self) -> &[f64] {
        &self.plasma
    }

    /// Frame-aligned whole-blood samples as supplied
    pub fn blood(&self) -> &[f64] {
        &self.blood
    }

    /// Spacing of the fine grid
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of fine grid nodes
    pub fn grid_len(&self) -> usize {
        self.grid_times.len()
    }

    pub fn grid_times(&self) -> &[f64] {
        &self.grid_times
    }

    /// Plasma input on the fine grid
    pub fn plasma_grid(&self) -> &[f64] {
        &self.plasma_grid
    }

    /// Whole-blood input on the fine grid
    pub fn blood_grid(&self) -> &[f64] {
        &self.blood_grid
    }

    /// Apply decay to a curve sampled on the fine grid and average it over each frame.
    ///
    /// Between grid nodes the decayed curve is taken as linear, so the frame
    /// mean is exact for that interpolant. Zero-length frames yield the
    /// interpolated value at the frame time. The map is linear in `curve`,
    /// which lets the Jacobian use it column by column.
    pub fn frame_average(&self, curve: &[f64]) -> DVector<f64> {
        debug_assert_eq!(curve.len(), self.grid_len());

        let decayed: Vec<f64> = curve
            .iter()
            .zip(self.decay_grid.iter())
            .map(|(c, d)| c * d)
            .collect();

        let mut cumulative = Vec::with_capacity(decayed.len());
        let mut acc = 0.0;
        cumulative.push(acc);
        for pair in decayed.windows(2) {
            acc += 0.5 * self.step * (pair[0] + pair[1]);
            cumulative.push(acc);
        }

        DVector::from_iterator(
            self.frames.len(),
            self.frames.iter().map(|(start, end)| {
                let length = (end.index as f64 - start.index as f64) * self.step + end.offset
                    - start.offset;
                if length <= 0.0 {
                    value_at(&decayed, self.step, *start)
                } else {
                    (integral_to(&cumulative, &decayed, self.step, *end)
                        - integral_to(&cumulative, &decayed, self.step, *start))
                        / length
                }
            }),
        )
    }
}

fn locate(t: f64, step: f64, intervals: usize) -> GridLocation {
    let index = ((t / step).floor() as usize).min(intervals - 1);
    let offset = (t - index as f64 * step).clamp(0.0, step);
    GridLocation { index, offset }
}

fn value_at(values: &[f64], step: f64, loc: GridLocation) -> f64 {
    let lo = values[loc.index];
    let hi = values[loc.index + 1];
    lo + (hi - lo) * loc.offset / step
}

fn integral_to(cumulative: &[f64], values: &[f64], step: f64, loc: GridLocation) -> f64 {
    let lo = values[loc.index];
    let hi = values[loc.index + 1];
    let s = loc.offset;
    cumulative[loc.index] + lo * s + (hi - lo) * s * s / (2.0 * step)
}

/// Linear interpolation of frame samples placed at `knots`, zero at time zero and
/// held constant after the last knot.
fn resample(knots: &[f64], samples: &[f64], grid: &[f64]) -> Vec<f64> {
    let mut kt = Vec::with_capacity(knots.len() + 1);
    let mut kv = Vec::with_capacity(knots.len() + 1);
    if knots.first().is_some_and(|&t| t > 0.0) {
        kt.push(0.0);
        kv.push(0.0);
    }
    for (&t, &v) in knots.iter().zip(samples.iter()) {
        // repeated knot times keep the later sample
        if kt.last().is_some_and(|&last| last >= t) {
            if let Some(last) = kv.last_mut() {
                *last = v;
            }
            continue;
        }
        kt.push(t);
        kv.push(v);
    }

    let mut seg = 0;
    grid.iter()
        .map(|&t| {
            while seg + 1 < kt.len() && kt[seg + 1] <= t {
                seg += 1;
            }
            if seg + 1 >= kt.len() || t <= kt[seg] {
                kv[seg]
            } else {
                let w = (t - kt[seg]) / (kt[seg + 1] - kt[seg]);
                kv[seg] + w * (kv[seg + 1] - kv[seg])
            }
        })
        .collect()
}
