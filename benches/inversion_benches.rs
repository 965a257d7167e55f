use RustedPolyprism::geophysics::model_utils::{build_range_param, initial_cylinder};
use RustedPolyprism::geophysics::polyprism::{MainField, ObservationPoints, ang2vec};
use RustedPolyprism::geophysics::polyprism_tf::{ForwardOperator, PolyprismTotalField};
use RustedPolyprism::numerical::optimization::LM_polyprism::*;
use RustedPolyprism::numerical::optimization::forward_adapter::ForwardAdapter;
use RustedPolyprism::numerical::optimization::sensitivity::SensitivityBuilder;
use criterion::{Criterion, criterion_group, criterion_main};
use nalgebra::DVector;
use std::hint::black_box;

fn problem(vertices: usize, prisms: usize) -> InversionProblem {
    let layout = PrismLayout::new(vertices, prisms).unwrap();
    let mag = ang2vec(3.0, -17.0, -19.0);
    let field = MainField::new(-17.0, -19.0);
    let points = ObservationPoints::regular_grid([-3000.0, 3000.0, -3000.0, 3000.0], (20, 20), 0.0);
    let (truth, _) = initial_cylinder(&layout, 100.0, -100.0, 100.0, 350.0, 600.0, &mag).unwrap();
    let observed = PolyprismTotalField.total_field(&points, &truth, &field);
    let (_, m0) = initial_cylinder(&layout, 0.0, 0.0, 100.0, 300.0, 500.0, &mag).unwrap();
    let bounds =
        build_range_param(&layout, 10.0, 2000.0, -2000.0, 2000.0, -2000.0, 2000.0, 10.0, 1000.0).unwrap();
    let outcrop = DVector::from_element(layout.block(), 500.0);
    InversionProblem::new(points, observed, field, ModelSetup::new(layout, 100.0, mag), m0, bounds, outcrop)
}

fn bench_sensitivity(c: &mut Criterion) {
    let p = problem(12, 4);
    let model = p.setup.model(&p.m0).unwrap();
    let operator = PolyprismTotalField;
    let adapter = ForwardAdapter::new(&operator, &p.points, p.field);
    let builder = SensitivityBuilder::new(&adapter, p.setup.layout, p.steps);
    c.bench_function("sensitivity 400 points x 57 parameters", |b| {
        b.iter(|| builder.build(black_box(&model)))
    });
}

fn bench_short_inversion(c: &mut Criterion) {
    let p = problem(8, 2).with_controls(IterationControls::default().with_maxit(3));
    let mut group = c.benchmark_group("inversion");
    group.sample_size(10);
    group.bench_function("3 iterations, 8 vertices x 2 prisms", |b| {
        b.iter(|| invert(black_box(p.clone())).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_sensitivity, bench_short_inversion);
criterion_main!(benches);
