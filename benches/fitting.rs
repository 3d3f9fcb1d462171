use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kinfit::*;
use nalgebra::DVector;
use ndarray::Array2;
use std::hint::black_box;

const DECAY_F18: f64 = 0.693147 / 109.77;
const TRUTH: [f64; 7] = [0.08, 0.9, 1.1, 0.04, 0.008, 1.6, 0.25];

fn liver_context(step: f64) -> KineticModelContext {
    let mut durations = vec![0.25; 8];
    durations.extend(vec![0.5; 6]);
    durations.extend(vec![1.0; 5]);
    durations.extend(vec![4.0; 6]);
    let timing = FrameTiming::from_durations(&durations).unwrap();
    let plasma: Vec<f64> = timing
        .mid_times()
        .iter()
        .map(|&t| 60.0 * t * (-4.0 * t).exp() + 3.0 * (-0.15 * t).exp() + (-0.01 * t).exp())
        .collect();
    let blood = plasma.iter().map(|c| 1.1 * c).collect();
    KineticModelContext::liver(ScanContext::new(timing, plasma, blood, DECAY_F18, step).unwrap())
}

fn space() -> ParameterSpace {
    ParameterSpace::from_mask(
        vec![0.0; 7],
        vec![1.0, 5.0, 5.0, 1.0, 0.5, 10.0, 1.0],
        &[1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
    )
    .unwrap()
}

fn tacs(context: &KineticModelContext, num_vox: usize) -> Array2<f64> {
    let mut tac = Array2::zeros((context.num_frames(), num_vox));
    for j in 0..num_vox {
        let mut p = TRUTH;
        p[1] *= 1.0 + 0.01 * j as f64;
        let c = context.evaluate(&DVector::from_column_slice(&p));
        for k in 0..c.len() {
            tac[[k, j]] = c[k] * (1.0 + 0.02 * ((k * 7 + j) as f64).sin());
        }
    }
    tac
}

fn model_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("liver model");
    for step in [0.05, 0.01] {
        let context = liver_context(step);
        let p = DVector::from_column_slice(&TRUTH);
        group.bench_with_input(BenchmarkId::new("evaluate", step), &p, |b, p| {
            b.iter(|| black_box(context.evaluate(black_box(p))))
        });
        group.bench_with_input(BenchmarkId::new("jacobian", step), &p, |b, p| {
            b.iter(|| black_box(context.jacobian(black_box(p))))
        });
    }
    group.finish();
}

fn voxel_batch(c: &mut Criterion) {
    let context = liver_context(0.05);
    let space = space();
    let weights = Array2::from_elem((context.num_frames(), 1), 1.0);
    let initial = Array2::from_shape_vec((7, 1), vec![0.1, 0.8, 1.0, 0.05, 0.01, 1.6, 0.25]).unwrap();

    let mut group = c.benchmark_group("voxel batch");
    group.sample_size(10);
    for num_vox in [16, 128] {
        let tac = tacs(&context, num_vox);
        for (label, options) in [
            ("sequential", FitOptions::new().sequential()),
            ("parallel", FitOptions::new().parallel()),
        ] {
            group.bench_with_input(BenchmarkId::new(label, num_vox), &tac, |b, tac| {
                b.iter(|| {
                    black_box(
                        fit_voxels(
                            &context,
                            &space,
                            tac.view(),
                            weights.view(),
                            initial.view(),
                            &options,
                        )
                        .unwrap(),
                    )
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, model_evaluation, voxel_batch);
criterion_main!(benches);
