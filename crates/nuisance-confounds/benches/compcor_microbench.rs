// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CompCor and morphology microbenchmarks
//!
//! Sizes follow a typical 3 mm functional grid.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{s, Array3, ArrayD, IxDyn};
use nuisance_config::{ComponentCriterion, Connectivity};
use nuisance_confounds::compcor::{compute, CompCorParams};
use nuisance_confounds::morphology::binary_erosion;
use nuisance_confounds::resample::{resample_roi, Grid};
use nuisance_structures::{Affine, BinaryMask, FunctionalSeries, Image, ImageHeader, Roi};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn synthetic_series(shape: [usize; 3], volumes: usize) -> FunctionalSeries {
    let mut rng = StdRng::seed_from_u64(2025);
    let data = ArrayD::from_shape_fn(IxDyn(&[shape[0], shape[1], shape[2], volumes]), |_| {
        1000.0 + rng.gen_range(-10.0..10.0)
    });
    let header = ImageHeader {
        repetition_time: Some(2.0),
        ..ImageHeader::default()
    };
    let image = Image::new(data, Affine::from_zooms([3.0; 3], [0.0; 3]), header)
        .expect("synthetic series");
    FunctionalSeries::new("bold", image).expect("4-D series")
}

fn box_roi(shape: [usize; 3], margin: usize) -> Roi {
    let mut mask = Array3::from_elem((shape[0], shape[1], shape[2]), false);
    mask.slice_mut(s![
        margin..shape[0] - margin,
        margin..shape[1] - margin,
        margin..shape[2] - margin
    ])
    .fill(true);
    Roi::new("combined", BinaryMask::new(mask, Affine::from_zooms([3.0; 3], [0.0; 3])))
}

fn bench_compcor(c: &mut Criterion) {
    let mut group = c.benchmark_group("compcor");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    let shape = [32, 32, 16];
    let series = synthetic_series(shape, 100);
    let params = CompCorParams {
        criterion: ComponentCriterion::Count(6),
        ..CompCorParams::default()
    };
    for margin in [10usize, 6, 4] {
        let roi = box_roi(shape, margin);
        group.bench_with_input(
            BenchmarkId::new("voxels", roi.voxel_count()),
            &roi,
            |b, roi| {
                b.iter(|| {
                    let output = compute(&series, roi, 4, Some(2.0), &params).expect("compcor");
                    black_box(output.components.n_columns())
                })
            },
        );
    }
    group.finish();
}

fn bench_erosion(c: &mut Criterion) {
    let mut group = c.benchmark_group("erosion");
    let roi = box_roi([64, 64, 30], 4);
    for connectivity in [Connectivity::Six, Connectivity::TwentySix] {
        group.bench_with_input(
            BenchmarkId::new(format!("{:?}", connectivity), 3),
            &connectivity,
            |b, &connectivity| {
                b.iter(|| black_box(binary_erosion(roi.mask().mask(), connectivity, 3)))
            },
        );
    }
    group.finish();
}

fn bench_resample(c: &mut Criterion) {
    // 1 mm anatomical ROI onto a 3 mm functional grid
    let mut mask = Array3::from_elem((192, 192, 90), false);
    mask.slice_mut(s![40..150, 40..150, 20..70]).fill(true);
    let roi = Roi::new("wm", BinaryMask::new(mask, Affine::identity()));
    let grid = Grid::new([64, 64, 30], Affine::from_zooms([3.0; 3], [0.0; 3]));
    c.bench_function("resample_roi_1mm_to_3mm", |b| {
        b.iter(|| black_box(resample_roi(&roi, &grid).expect("resample")))
    });
}

criterion_group!(benches, bench_compcor, bench_erosion, bench_resample);
criterion_main!(benches);
