use crate::Utils::logger::{save_data_to_csv, save_history_to_csv};
use crate::Utils::task_parser::InversionTask;
use crate::geophysics::model_utils::{build_range_param, initial_cylinder, varying_param};
use crate::geophysics::polyprism::{MainField, ObservationPoints, PolygonalPrism, ang2vec, volume_polygon};
use crate::geophysics::polyprism_tf::{ForwardOperator, PolyprismTotalField};
use crate::numerical::optimization::LM_polyprism::*;
use crate::numerical::optimization::inversion_grid::{InversionGrid, run_fixed};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const INC: f64 = -17.0;
const DEC: f64 = -19.0;

/// irregular body: two prisms with 8 vertices, top at 100 m
fn synthetic_body() -> (PrismLayout, DVector<f64>, f64, nalgebra::Vector3<f64>) {
    let layout = PrismLayout { vertices: 8, prisms: 2 };
    let truth = DVector::from_vec(vec![
        700.0, 650.0, 500.0, 450.0, 480.0, 520.0, 600.0, 720.0, 100.0, -50.0, // first prism
        550.0, 500.0, 420.0, 380.0, 400.0, 430.0, 480.0, 560.0, 150.0, -80.0, // second prism
        350.0,
    ]);
    (layout, truth, 100.0, ang2vec(3.0, INC, DEC))
}

fn synthetic_survey(
    model: &[PolygonalPrism],
    shape: (usize, usize),
) -> (ObservationPoints, DVector<f64>) {
    let points = ObservationPoints::regular_grid([-3000.0, 3000.0, -3000.0, 3000.0], shape, 0.0);
    let observed = PolyprismTotalField.total_field(&points, model, &MainField::new(INC, DEC));
    (points, observed)
}

fn report(result: &InversionResult) {
    println!(
        "{:?} after {} iterations, {} forward calls",
        result.termination, result.iterations, result.forward_calls
    );
    println!(
        "objective {:.4e} -> {:.4e}",
        result.history.objectives.first().copied().unwrap_or(f64::NAN),
        result.final_objective()
    );
    println!("volume of the estimate {:.4e} m^3", volume_polygon(&result.model));
    println!("parameters {}", result.parameters.transpose());
}

fn run_example(example: usize) -> Result<(), InversionError> {
    match example {
        0 => {
            // quadratic loss, weak smoothness, noiseless data
            let (layout, truth, z0, mag) = synthetic_body();
            let setup = ModelSetup::new(layout, z0, mag);
            let (points, observed) = synthetic_survey(&setup.model(&truth)?, (25, 25));
            let (_, m0) = initial_cylinder(&layout, 0.0, 0.0, z0, 300.0, 500.0, &mag)?;
            let bounds = build_range_param(&layout, 10.0, 2000.0, -2000.0, 2000.0, -2000.0, 2000.0, 10.0, 1000.0)?;
            let outcrop = m0.rows(0, layout.block()).into_owned();
            let problem = InversionProblem::new(points.clone(), observed.clone(), MainField::new(INC, DEC), setup, m0, bounds, outcrop)
                .with_weights(RegularizationWeights::new([1e-4, 1e-4, 0.0, 0.0, 1e-4, 1e-7, 1e-7])?)
                .with_controls(IterationControls::default().with_maxit(30));
            let mut inversion = PolyprismInversion::new(problem);
            inversion.loglevel = Some("info".to_string());
            let result = inversion.solve()?;
            report(&result);
            let dir = std::env::temp_dir();
            save_history_to_csv(&result.history, &dir.join("polyprism_history.csv"))?;
            save_data_to_csv(&points, &observed, &result.fitted_data, &dir.join("polyprism_fit.csv"))?;
        }
        1 => {
            // absolute loss on data with outliers
            let (layout, truth, z0, mag) = synthetic_body();
            let setup = ModelSetup::new(layout, z0, mag);
            let (points, mut observed) = synthetic_survey(&setup.model(&truth)?, (20, 20));
            let mut rng = StdRng::seed_from_u64(42);
            for v in observed.iter_mut() {
                *v += rng.random_range(-2.0..2.0);
            }
            for _ in 0..12 {
                let i = rng.random_range(0..observed.len());
                observed[i] += rng.random_range(200.0..500.0);
            }
            let (_, m0) = initial_cylinder(&layout, 0.0, 0.0, z0, 300.0, 500.0, &mag)?;
            let bounds = build_range_param(&layout, 10.0, 2000.0, -2000.0, 2000.0, -2000.0, 2000.0, 10.0, 1000.0)?;
            let outcrop = m0.rows(0, layout.block()).into_owned();
            for loss in [LossNorm::Quadratic, LossNorm::Absolute] {
                let problem = InversionProblem::new(
                    points.clone(),
                    observed.clone(),
                    MainField::new(INC, DEC),
                    setup,
                    m0.clone(),
                    bounds.clone(),
                    outcrop.clone(),
                )
                .with_loss(loss)
                .with_weights(RegularizationWeights::new([1e-4, 1e-4, 0.0, 0.0, 1e-4, 1e-7, 1e-7])?);
                let result = invert(problem)?;
                println!("\n {} loss", loss);
                report(&result);
                let error = (&result.parameters - &truth).abs().max();
                println!("largest parameter error {:.2}", error);
            }
        }
        2 => {
            // three prisms tied to a known outcrop, with a time budget
            let layout = PrismLayout::new(6, 3)?;
            let mag = ang2vec(2.0, 45.0, 10.0);
            let (truth_model, _) = initial_cylinder(&layout, 200.0, 100.0, 0.0, 250.0, 600.0, &mag)?;
            let (points, observed) = synthetic_survey(&truth_model, (20, 20));
            let (_, m0) = initial_cylinder(&layout, 0.0, 0.0, 0.0, 200.0, 400.0, &mag)?;
            let bounds = build_range_param(&layout, 10.0, 1500.0, -1500.0, 1500.0, -1500.0, 1500.0, 50.0, 600.0)?;
            // radii and origin seen at the surface
            let mut outcrop = DVector::from_element(layout.block(), 600.0);
            outcrop[layout.vertices] = 200.0;
            outcrop[layout.vertices + 1] = 100.0;
            let problem = InversionProblem::new(points, observed, MainField::new(45.0, 10.0), ModelSetup::new(layout, 0.0, mag), m0, bounds, outcrop)
                .with_weights(RegularizationWeights::new([1e-4, 1e-4, 1e-2, 1e-2, 1e-4, 1e-6, 1e-6])?)
                .with_controls(IterationControls::default().with_max_duration(Duration::from_secs(120)));
            let result = invert(problem)?;
            report(&result);
            println!("scaled weights {:?}", result.scaled_weights.alpha);
        }
        3 => {
            // the whole setup read from a task document
            let (layout, truth, z0, mag) = synthetic_body();
            let (points, observed) = synthetic_survey(&ModelSetup::new(layout, z0, mag).model(&truth)?, (20, 20));
            let dir = std::env::temp_dir().join("polyprism_task");
            std::fs::create_dir_all(&dir)?;
            save_data_to_csv(&points, &observed, &observed, &dir.join("survey.csv"))?;
            let document = r#"
            geometry
             vertices: 8
             prisms: 2
             z0: 100.0
             magnetization: 3.0, -17.0, -19.0
            field
             inc: -17.0
             dec: -19.0
            solver
             maxit: 15
             loss: 2
             loglevel: info
            bounds
             radius: 10.0, 2000.0
             x0: -2000.0, 2000.0
             y0: -2000.0, 2000.0
             dz: 10.0, 1000.0
            regularization
             alpha: 1e-4, 1e-4, 0.0, 0.0, 1e-4, 1e-7, 1e-7
            initial
             dz: 300.0
             radius: 500.0
            data
             file: survey.csv
            "#;
            let task_path = dir.join("task.txt");
            std::fs::write(&task_path, document)?;
            let task = InversionTask::from_file(&task_path)?;
            let loglevel = task.loglevel.clone();
            let mut inversion = PolyprismInversion::new(task.into_problem()?);
            inversion.loglevel = loglevel;
            let result = inversion.solve()?;
            report(&result);
        }
        4 => {
            // dependence of the solution on depth and magnetization
            let layout = PrismLayout::new(6, 1)?;
            let mag = ang2vec(3.0, INC, DEC);
            let (truth_model, _) = initial_cylinder(&layout, 0.0, 0.0, 150.0, 400.0, 500.0, &mag)?;
            let (points, observed) = synthetic_survey(&truth_model, (15, 15));
            let (_, m0) = initial_cylinder(&layout, 0.0, 0.0, 150.0, 300.0, 400.0, &mag)?;
            let bounds = build_range_param(&layout, 10.0, 2000.0, -2000.0, 2000.0, -2000.0, 2000.0, 10.0, 1500.0)?;
            let outcrop = m0.rows(0, layout.block()).into_owned();
            let problem = InversionProblem::new(points, observed, MainField::new(INC, DEC), ModelSetup::new(layout, 150.0, mag), m0, bounds, outcrop)
                .with_controls(IterationControls::default().with_maxit(10));

            let grid = InversionGrid::run(&problem, &[100.0, 150.0, 200.0], &[2.0, 3.0, 4.0], INC, DEC)?;
            let misfit = grid.misfit_matrix();
            println!("misfit (rows: z0, columns: intensity) {}", misfit);
            println!("best (z0, intensity) = {:?}", grid.best(&misfit));

            let fixed = varying_param(150.0, 50.0, 3.0, 1.0, INC, 5.0, DEC, 5.0);
            let results = run_fixed(&problem, &fixed)?;
            for (f, r) in fixed.iter().zip(results.iter()) {
                println!(
                    "z0 {:>6.1} |m| {:>4.1}: objective {:.4e}, dz {:.1}",
                    f.z0,
                    f.magnetization.norm(),
                    r.final_objective(),
                    r.parameters[layout.dz_index()]
                );
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn inversion_examples(example: usize) {
    if let Err(e) = run_example(example) {
        eprintln!("example {} failed: {}", example, e);
    }
}
