//! Convolution of a grid-sampled input with an exponential kernel.
//!
//! For an input `u` that is linear between grid nodes, the convolution
//! `y(t) = ∫ u(τ) exp(-k (t - τ)) dτ` satisfies the exact one-interval update
//!
//! `y[n+1] = E y[n] + a u[n] + b u[n+1]`
//!
//! with `E = exp(-k Δ)`. The derivative with respect to `k` follows the same
//! recurrence with the derivatives of `E`, `a` and `b`, so it is exact for the
//! discrete scheme and not only for the continuous convolution.

/// Below this value of `k Δ` the moment integrals are summed as a series.
const SERIES_LIMIT: f64 = 0.5;
const SERIES_TERMS: usize = 18;

#[derive(Debug, Clone, Copy)]
struct StepCoefficients {
    e: f64,
    a: f64,
    b: f64,
    de: f64,
    da: f64,
    db: f64,
}

/// Moments `I_m = ∫_0^Δ v^m exp(-k v) dv` for m = 0, 1, 2.
fn moments(rate: f64, step: f64) -> (f64, f64, f64) {
    let x = rate * step;
    if x.abs() < SERIES_LIMIT {
        let mut term = 1.0;
        let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
        for j in 0..SERIES_TERMS {
            let jf = j as f64;
            s0 += term / (jf + 1.0);
            s1 += term / (jf + 2.0);
            s2 += term / (jf + 3.0);
            term *= -x / (jf + 1.0);
        }
        (s0 * step, s1 * step * step, s2 * step * step * step)
    } else {
        let e = (-x).exp();
        (
            (1.0 - e) / rate,
            (1.0 - e * (1.0 + x)) / (rate * rate),
            (2.0 - e * (2.0 + 2.0 * x + x * x)) / (rate * rate * rate),
        )
    }
}

fn coefficients(rate: f64, step: f64) -> StepCoefficients {
    let (i0, i1, i2) = moments(rate, step);
    let e = (-rate * step).exp();
    StepCoefficients {
        e,
        a: i1 / step,
        b: i0 - i1 / step,
        de: -step * e,
        da: -i2 / step,
        db: -i1 + i2 / step,
    }
}

/// Convolve `input` with `exp(-rate t)` on a uniform grid of spacing `step`.
pub fn exp_conv(input: &[f64], rate: f64, step: f64) -> Vec<f64> {
    let c = coefficients(rate, step);
    let mut out = Vec::with_capacity(input.len());
    let mut y = 0.0;
    if !input.is_empty() {
        out.push(y);
    }
    for pair in input.windows(2) {
        y = c.e * y + c.a * pair[0] + c.b * pair[1];
        out.push(y);
    }
    out
}

/// Convolve `input` with `exp(-rate t)` and return the derivative of the result
/// with respect to `rate` alongside it.
pub fn exp_conv_with_derivative(input: &[f64], rate: f64, step: f64) -> (Vec<f64>, Vec<f64>) {
    let c = coefficients(rate, step);
    let mut out = Vec::with_capacity(input.len());
    let mut dout = Vec::with_capacity(input.len());
    let (mut y, mut dy) = (0.0, 0.0);
    if !input.is_empty() {
        out.push(y);
        dout.push(dy);
    }
    for pair in input.windows(2) {
        dy = c.e * dy + c.de * y + c.da * pair[0] + c.db * pair[1];
        y = c.e * y + c.a * pair[0] + c.b * pair[1];
        out.push(y);
        dout.push(dy);
    }
    (out, dout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn series_and_closed_form_agree_at_the_switch() {
        let step = 0.1;
        let below = moments(SERIES_LIMIT / step * (1.0 - 1e-9), step);
        let above = moments(SERIES_LIMIT / step * (1.0 + 1e-9), step);
        assert_relative_eq!(below.0, above.0, max_relative = 1e-7);
        assert_relative_eq!(below.1, above.1, max_relative = 1e-7);
        assert_relative_eq!(below.2, above.2, max_relative = 1e-7);
    }

    #[test]
    fn zero_rate_is_trapezoidal_integration() {
        let input = vec![0.0, 1.0, 2.0, 3.0];
        let y = exp_conv(&input, 0.0, 0.5);
        assert_relative_eq!(y[3], 0.5 * 3.0 * 3.0 / 2.0, epsilon = 1e-14);
    }

    #[test]
    fn constant_input_approaches_steady_state() {
        let rate = 0.8;
        let step = 0.05;
        let input = vec![1.0; 2001];
        let y = exp_conv(&input, rate, step);
        // step input that starts at t = 0 on a constant grid is exact
        let t = 100.0;
        assert_relative_eq!(y[2000], (1.0 - (-rate * t).exp()) / rate, epsilon = 1e-12);
    }

    #[test]
    fn matches_closed_form_for_linear_input() {
        // u(t) = t, y(t) = t/k - (1 - exp(-k t))/k^2
        let rate = 0.3;
        let step = 0.2;
        let input: Vec<f64> = (0..51).map(|n| n as f64 * step).collect();
        let y = exp_conv(&input, rate, step);
        for (n, v) in y.iter().enumerate() {
            let t = n as f64 * step;
            let exact = t / rate - (1.0 - (-rate * t).exp()) / (rate * rate);
            assert_relative_eq!(*v, exact, epsilon = 1e-12);
        }
    }

    #[test]
    fn rate_derivative_matches_finite_difference() {
        let step = 0.1;
        let input: Vec<f64> = (0..80)
            .map(|n| {
                let t = n as f64 * step;
                t * (-t).exp()
            })
            .collect();
        for &rate in &[0.0, 0.01, 0.7, 4.0] {
            let (_, dy) = exp_conv_with_derivative(&input, rate, step);
            let h = 1e-6;
            let up = exp_conv(&input, rate + h, step);
            let down = exp_conv(&input, rate - h, step);
            for n in 0..input.len() {
                let fd = (up[n] - down[n]) / (2.0 * h);
                assert_relative_eq!(dy[n], fd, epsilon = 1e-7, max_relative = 1e-5);
            }
        }
    }
}
