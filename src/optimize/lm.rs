//! Bounded Levenberg-Marquardt solver for a single time-activity curve.
//!
//! The solver minimises the weighted sum of squared residuals
//! `Σ w[k] (y[k] - f(p)[k])²` over the free parameters of a
//! [`ParameterSpace`]. Each iteration solves the damped normal equations
//!
//! `(JᵀWJ + λ diag(JᵀWJ)) δ = JᵀW r`
//!
//! on the free columns of the Jacobian, projects `p + δ` onto the bounds and
//! accepts the projected point only if it lowers the objective. Rejections
//! raise the damping and retry from the same point.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::ParameterSpace;
use crate::model::KineticModelContext;
use crate::KinfitError;

/// Relative floor applied to the diagonal used for Marquardt scaling
const DIAG_FLOOR: f64 = 1e-12;

/// Settings of the Levenberg-Marquardt iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmSettings {
    /// Maximum number of iterations (Jacobian evaluations)
    pub max_iterations: usize,
    /// Initial damping factor
    pub lambda_init: f64,
    /// Factor applied to the damping after a rejected step
    pub lambda_up: f64,
    /// Divisor applied to the damping after an accepted step
    pub lambda_down: f64,
    /// Damping below which the factor is not decreased further
    pub lambda_min: f64,
    /// Damping above which the fit is declared stalled
    pub lambda_max: f64,
    /// Relative objective improvement considered converged
    pub ftol: f64,
    /// Relative step size considered converged
    pub xtol: f64,
    /// Largest gradient component considered stationary
    pub gtol: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            lambda_init: 1e-2,
            lambda_up: 10.0,
            lambda_down: 10.0,
            lambda_min: 1e-12,
            lambda_max: 1e12,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 0.0,
        }
    }
}

impl LmSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, ftol: f64, xtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self
    }

    pub fn with_gradient_tolerance(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_damping(mut self, init: f64, up: f64, down: f64) -> Self {
        self.lambda_init = init;
        self.lambda_up = up;
        self.lambda_down = down;
        self
    }
}

/// How a single fit terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// Every parameter is fixed; the initial vector was evaluated only
    NoFreeParameters,
    /// The iteration limit is zero; the initial vector was evaluated only
    NotIterated,
    /// A convergence tolerance was met
    Converged,
    /// The iteration limit was reached
    IterationLimit,
    /// No improving step could be found before the damping cap, or the data
    /// could not be evaluated
    Stalled,
}

impl FitStatus {
    /// `false` only for [`FitStatus::Stalled`]
    pub fn is_success(&self) -> bool {
        !matches!(self, FitStatus::Stalled)
    }
}

/// Outcome of one fit: final parameters and the curve they produce.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub(crate) params: DVector<f64>,
    pub(crate) curve: DVector<f64>,
    pub(crate) sse: f64,
    pub(crate) iterations: usize,
    pub(crate) status: FitStatus,
    pub(crate) sse_history: Vec<f64>,
}

impl FitResult {
    pub fn params(&self) -> &DVector<f64> {
        &self.params
    }

    /// Model prediction at [`FitResult::params`]
    pub fn curve(&self) -> &DVector<f64> {
        &self.curve
    }

    /// Weighted sum of squared residuals at the final parameters
    pub fn sse(&self) -> f64 {
        self.sse
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Objective at the starting point followed by its value after every accepted step
    pub fn sse_history(&self) -> &[f64] {
        &self.sse_history
    }

    pub fn into_parts(self) -> (DVector<f64>, DVector<f64>) {
        (self.params, self.curve)
    }
}

enum StepOutcome {
    Accepted {
        params: DVector<f64>,
        curve: DVector<f64>,
        sse: f64,
        step_norm: f64,
    },
    Negligible,
    Exhausted,
}

/// Levenberg-Marquardt solver bound to a model context and parameter space.
///
/// The solver holds only shared references, so one instance can serve every
/// voxel of a batch, from any number of threads.
#[derive(Debug, Clone, Copy)]
pub struct LevenbergMarquardt<'a> {
    context: &'a KineticModelContext,
    space: &'a ParameterSpace,
    settings: &'a LmSettings,
}

impl<'a> LevenbergMarquardt<'a> {
    pub fn new(
        context: &'a KineticModelContext,
        space: &'a ParameterSpace,
        settings: &'a LmSettings,
    ) -> Self {
        Self {
            context,
            space,
            settings,
        }
    }

    /// Fit one curve.
    ///
    /// `tac` and `weights` have one entry per frame, `initial` one entry per
    /// model parameter. Fixed parameters are returned exactly as given.
    ///
    /// # Errors
    /// Returns [`KinfitError::DimensionMismatch`] when an input length does not
    /// match the model, or the parameter space was built for another model.
    pub fn fit(
        &self,
        tac: &DVector<f64>,
        weights: &DVector<f64>,
        initial: &DVector<f64>,
    ) -> Result<FitResult, KinfitError> {
        let num_frm = self.context.num_frames();
        let num_par = self.context.num_params();
        KinfitError::check_len("TAC length", num_frm, tac.len())?;
        KinfitError::check_len("weight length", num_frm, weights.len())?;
        KinfitError::check_len("initial parameter length", num_par, initial.len())?;
        self.space.check_num_params(num_par)?;

        Ok(self.iterate(tac, weights, initial))
    }

    fn iterate(
        &self,
        tac: &DVector<f64>,
        weights: &DVector<f64>,
        initial: &DVector<f64>,
    ) -> FitResult {
        let free = self.space.free_indices();
        let mut params = initial.clone();

        if free.is_empty() || self.settings.max_iterations == 0 {
            let curve = self.context.evaluate(&params);
            let sse = weighted_sse(tac, weights, &curve);
            let status = if free.is_empty() {
                FitStatus::NoFreeParameters
            } else {
                FitStatus::NotIterated
            };
            return FitResult {
                params,
                curve,
                sse,
                iterations: 0,
                status,
                sse_history: vec![sse],
            };
        }

        for &i in &free {
            params[i] = self.space.clamp(i, params[i]);
        }
        let mut curve = self.context.evaluate(&params);
        let mut sse = weighted_sse(tac, weights, &curve);
        let mut sse_history = vec![sse];

        if !sse.is_finite() {
            return FitResult {
                params,
                curve,
                sse,
                iterations: 0,
                status: FitStatus::Stalled,
                sse_history,
            };
        }

        let mut lambda = self.settings.lambda_init;
        let mut iterations = 0;

        let status = loop {
            if sse == 0.0 {
                break FitStatus::Converged;
            }
            if iterations >= self.settings.max_iterations {
                break FitStatus::IterationLimit;
            }
            iterations += 1;

            let residual = tac - &curve;
            let jacobian = self.context.jacobian(&params);
            let (normal, gradient) = normal_equations(&jacobian, &free, weights, &residual);

            // parameters on a bound whose descent direction points outward stay put
            let slots: Vec<usize> = (0..free.len())
                .filter(|&slot| !self.is_blocked(free[slot], params[free[slot]], gradient[slot]))
                .collect();
            if slots.is_empty() {
                break FitStatus::Converged;
            }
            let active: Vec<usize> = slots.iter().map(|&slot| free[slot]).collect();
            let normal = normal.select_rows(&slots).select_columns(&slots);
            let gradient = gradient.select_rows(&slots);
            if gradient.amax() <= self.settings.gtol {
                break FitStatus::Converged;
            }

            let outcome = self.damped_step(
                &params,
                sse,
                &normal,
                &gradient,
                &active,
                tac,
                weights,
                &mut lambda,
            );
            match outcome {
                StepOutcome::Accepted {
                    params: next,
                    curve: next_curve,
                    sse: next_sse,
                    step_norm,
                } => {
                    let improvement = sse - next_sse;
                    let previous = sse;
                    params = next;
                    curve = next_curve;
                    sse = next_sse;
                    sse_history.push(sse);
                    tracing::trace!(iteration = iterations, sse, lambda, "accepted step");

                    if improvement <= self.settings.ftol * previous
                        || step_norm <= self.settings.xtol * (params.norm() + self.settings.xtol)
                    {
                        break FitStatus::Converged;
                    }
                }
                StepOutcome::Negligible => break FitStatus::Converged,
                StepOutcome::Exhausted => break FitStatus::Stalled,
            }
        };

        FitResult {
            params,
            curve,
            sse,
            iterations,
            status,
            sse_history,
        }
    }

    /// Search for an improving step from `params`, raising the damping after each failure.
    #[allow(clippy::too_many_arguments)]
    fn damped_step(
        &self,
        params: &DVector<f64>,
        sse: f64,
        normal: &DMatrix<f64>,
        gradient: &DVector<f64>,
        free: &[usize],
        tac: &DVector<f64>,
        weights: &DVector<f64>,
        lambda: &mut f64,
    ) -> StepOutcome {
        let scale_floor = DIAG_FLOOR * normal.diagonal().max().max(f64::MIN_POSITIVE);
        let settings = self.settings;

        let negligible = settings.xtol * (params.norm() + settings.xtol);

        loop {
            if let Some((trial, raw_norm)) =
                self.propose(params, normal, gradient, free, *lambda, scale_floor)
            {
                let step_norm = (&trial - params).norm();
                if step_norm <= negligible {
                    if raw_norm <= negligible {
                        return StepOutcome::Negligible;
                    }
                    // the bounds swallowed the step; more damping turns it towards the gradient
                } else {
                    let curve = self.context.evaluate(&trial);
                    let trial_sse = weighted_sse(tac, weights, &curve);
                    if trial_sse.is_finite() && trial_sse < sse {
                        *lambda = (*lambda / settings.lambda_down).max(settings.lambda_min);
                        return StepOutcome::Accepted {
                            params: trial,
                            curve,
                            sse: trial_sse,
                            step_norm,
                        };
                    }
                }
            }

            *lambda *= settings.lambda_up;
            if *lambda > settings.lambda_max {
                return StepOutcome::Exhausted;
            }
        }
    }

    /// Solve the damped system and project the result onto the bounds.
    ///
    /// Returns the projected point with the norm of the unprojected step, or
    /// `None` when the system is singular or the step is not finite.
    fn propose(
        &self,
        params: &DVector<f64>,
        normal: &DMatrix<f64>,
        gradient: &DVector<f64>,
        free: &[usize],
        lambda: f64,
        scale_floor: f64,
    ) -> Option<(DVector<f64>, f64)> {
        let mut damped = normal.clone();
        for i in 0..damped.nrows() {
            damped[(i, i)] += lambda * normal[(i, i)].max(scale_floor);
        }
        let delta = damped.lu().solve(gradient)?;
        if !delta.iter().all(|d| d.is_finite()) {
            return None;
        }

        let mut trial = params.clone();
        for (slot, &i) in free.iter().enumerate() {
            trial[i] = self.space.clamp(i, params[i] + delta[slot]);
        }
        Some((trial, delta.norm()))
    }

    /// Whether parameter `index` sits on a bound that its descent direction
    /// `descent` (a component of `JᵀWr`) pushes against.
    fn is_blocked(&self, index: usize, value: f64, descent: f64) -> bool {
        let at_lower = value <= self.space.lower()[index] && descent <= 0.0;
        let at_upper = value >= self.space.upper()[index] && descent >= 0.0;
        at_lower || at_upper
    }
}

/// `Σ w[k] (y[k] - c[k])²`
pub fn weighted_sse(tac: &DVector<f64>, weights: &DVector<f64>, curve: &DVector<f64>) -> f64 {
    tac.iter()
        .zip(curve.iter())
        .zip(weights.iter())
        .map(|((y, c), w)| w * (y - c).powi(2))
        .sum()
}

/// `JᵀWJ` and `JᵀWr` restricted to the free columns of `jacobian`
fn normal_equations(
    jacobian: &DMatrix<f64>,
    free: &[usize],
    weights: &DVector<f64>,
    residual: &DVector<f64>,
) -> (DMatrix<f64>, DVector<f64>) {
    let j_free = jacobian.select_columns(free);
    let mut weighted = j_free.clone();
    for (k, w) in weights.iter().enumerate() {
        weighted.row_mut(k).scale_mut(*w);
    }
    let normal = j_free.transpose() * &weighted;
    let gradient = weighted.transpose() * residual;
    (normal, gradient)
}
