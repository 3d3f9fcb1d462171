mod common;

use approx::assert_relative_eq;
use common::*;
use kinfit::prelude::*;
use nalgebra::DVector;

fn central_difference(context: &KineticModelContext, p: &DVector<f64>, j: usize) -> DVector<f64> {
    let h = 1e-6 * p[j].abs().max(1e-2);
    let mut up = p.clone();
    let mut down = p.clone();
    up[j] += h;
    down[j] -= h;
    (context.evaluate(&up) - context.evaluate(&down)) / (2.0 * h)
}

#[test]
fn analytic_jacobian_matches_finite_differences() {
    let context = liver_context();
    let sets = [
        LIVER_TRUTH.to_vec(),
        vec![0.3, 0.2, 0.1, 0.3, 0.05, 0.4, 0.9],
        // irreversible trapping
        vec![0.05, 1.0, 0.8, 0.1, 0.0, 2.0, 0.1],
    ];

    for set in sets.iter() {
        let p = DVector::from_column_slice(set);
        let jac = context.jacobian(&p);
        assert_eq!(jac.nrows(), context.num_frames());
        assert_eq!(jac.ncols(), 7);

        for j in 0..7 {
            let fd = central_difference(&context, &p, j);
            for k in 0..context.num_frames() {
                assert_relative_eq!(jac[(k, j)], fd[k], epsilon = 1e-6, max_relative = 1e-4);
            }
        }
    }
}

#[test]
fn prediction_is_linear_in_blood_fraction() {
    let context = liver_context();
    let mut p = DVector::from_column_slice(&LIVER_TRUTH);
    p[0] = 0.0;
    let tissue = context.evaluate(&p);
    p[0] = 1.0;
    let blood = context.evaluate(&p);
    p[0] = 0.25;
    let mixed = context.evaluate(&p);

    for k in 0..mixed.len() {
        assert_relative_eq!(
            mixed[k],
            0.75 * tissue[k] + 0.25 * blood[k],
            max_relative = 1e-12,
            epsilon = 1e-12
        );
    }
}

#[test]
fn arterial_only_input_ignores_portal_rate() {
    let context = liver_context();
    let mut p = DVector::from_column_slice(&LIVER_TRUTH);
    p[6] = 1.0;
    p[5] = 0.5;
    let slow = context.evaluate(&p);
    p[5] = 5.0;
    let fast = context.evaluate(&p);
    for k in 0..slow.len() {
        assert_relative_eq!(slow[k], fast[k], epsilon = 1e-12);
    }
    let jac = context.jacobian(&p);
    for k in 0..slow.len() {
        assert_relative_eq!(jac[(k, 5)], 0.0, epsilon = 1e-12);
    }
}

#[test]
fn decay_reduces_late_activity() {
    let timing = FrameTiming::from_durations(&durations()).unwrap();
    let mid = timing.mid_times();
    let plasma: Vec<f64> = mid.iter().map(|&t| plasma_at(t)).collect();
    let blood = plasma.clone();
    let without = KineticModelContext::liver(
        ScanContext::new(timing.clone(), plasma.clone(), blood.clone(), 0.0, 0.02).unwrap(),
    );
    let with = KineticModelContext::liver(
        ScanContext::new(timing, plasma, blood, DECAY_F18, 0.02).unwrap(),
    );

    let p = DVector::from_column_slice(&LIVER_TRUTH);
    let a = without.evaluate(&p);
    let b = with.evaluate(&p);
    let last = a.len() - 1;
    assert!(b[last] < a[last]);
    let ratio = b[last] / a[last];
    let t_mid = mid[last];
    // frame averaging smears the decay factor only slightly
    assert_relative_eq!(ratio, (-DECAY_F18 * t_mid).exp(), max_relative = 1e-3);
}

#[test]
fn model_reports_its_parameters() {
    let context = liver_context();
    assert_eq!(context.model().name(), "liver");
    assert_eq!(
        context.model().parameter_names(),
        &["vb", "k1", "k2", "k3", "k4", "ka", "fa"]
    );
    assert_eq!(context.num_params(), 7);
}
