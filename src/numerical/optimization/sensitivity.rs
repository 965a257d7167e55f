//! Central-difference sensitivity matrix of the stacked-prism model.
//!
//! Every column perturbs a read-only snapshot of the current geometry, so the
//! columns are computed in parallel and written to disjoint slots.
use crate::geophysics::polyprism::PolygonalPrism;
use crate::numerical::optimization::forward_adapter::ForwardAdapter;
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use crate::numerical::optimization::param_codec::PrismLayout;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Perturbation sizes of the central differences (radius, x0, y0, thickness)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiniteDifferenceSteps {
    pub dr: f64,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl FiniteDifferenceSteps {
    pub fn new(dr: f64, dx: f64, dy: f64, dz: f64) -> Result<Self, InversionError> {
        let steps = FiniteDifferenceSteps { dr, dx, dy, dz };
        steps.validate()?;
        Ok(steps)
    }

    pub fn validate(&self) -> Result<(), InversionError> {
        for (name, value) in [("dr", self.dr), ("dx", self.dx), ("dy", self.dy), ("dz", self.dz)] {
            ensure(
                value > 0.0 && value.is_finite(),
                format!("finite-difference step {} must be positive, got {}", name, value),
            )?;
        }
        Ok(())
    }
}

impl Default for FiniteDifferenceSteps {
    fn default() -> Self {
        FiniteDifferenceSteps {
            dr: 1.0,
            dx: 1.0,
            dy: 1.0,
            dz: 1.0,
        }
    }
}

/// What a Jacobian column differentiates with respect to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTask {
    Radial { prism: usize, vertex: usize },
    OriginX(usize),
    OriginY(usize),
    Thickness,
}

/// column tasks in parameter-vector order
pub fn column_tasks(layout: &PrismLayout) -> Vec<ColumnTask> {
    let mut tasks = Vec::with_capacity(layout.n_params());
    for prism in 0..layout.prisms {
        for vertex in 0..layout.vertices {
            tasks.push(ColumnTask::Radial { prism, vertex });
        }
        tasks.push(ColumnTask::OriginX(prism));
        tasks.push(ColumnTask::OriginY(prism));
    }
    tasks.push(ColumnTask::Thickness);
    tasks
}

pub struct SensitivityBuilder<'a> {
    adapter: &'a ForwardAdapter<'a>,
    layout: PrismLayout,
    steps: FiniteDifferenceSteps,
    tasks: Vec<ColumnTask>,
}

impl<'a> SensitivityBuilder<'a> {
    pub fn new(adapter: &'a ForwardAdapter<'a>, layout: PrismLayout, steps: FiniteDifferenceSteps) -> Self {
        SensitivityBuilder {
            adapter,
            layout,
            steps,
            tasks: column_tasks(&layout),
        }
    }

    /// N x P matrix of derivatives of the predicted data at the geometry `base`
    pub fn build(&self, base: &[PolygonalPrism]) -> DMatrix<f64> {
        let columns: Vec<DVector<f64>> = self
            .tasks
            .par_iter()
            .map(|task| self.column(base, task))
            .collect();
        DMatrix::from_columns(&columns)
    }

    fn column(&self, base: &[PolygonalPrism], task: &ColumnTask) -> DVector<f64> {
        match *task {
            ColumnTask::Radial { prism, vertex } => {
                let delta = self.steps.dr;
                let patch = radial_patch(&base[prism], vertex, self.layout.vertices, delta);
                self.adapter.predict(&[patch]) / (2.0 * delta)
            }
            ColumnTask::OriginX(prism) => {
                let delta = self.steps.dx;
                let plus = base[prism].translated(delta, 0.0);
                let minus = base[prism].translated(-delta, 0.0);
                (self.adapter.predict(&[plus]) - self.adapter.predict(&[minus])) / (2.0 * delta)
            }
            ColumnTask::OriginY(prism) => {
                let delta = self.steps.dy;
                let plus = base[prism].translated(0.0, delta);
                let minus = base[prism].translated(0.0, -delta);
                (self.adapter.predict(&[plus]) - self.adapter.predict(&[minus])) / (2.0 * delta)
            }
            ColumnTask::Thickness => {
                let delta = self.steps.dz;
                let plus = shifted_stack(base, delta);
                let minus = shifted_stack(base, -delta);
                (self.adapter.predict(&plus) - self.adapter.predict(&minus)) / (2.0 * delta)
            }
        }
    }
}

/// Quadrilateral between the prism with vertex `k` pushed out by `delta` along its
/// radial direction and the prism with that vertex pulled in by `delta`. Its field is
/// the difference of the two perturbed prisms' fields.
fn radial_patch(prism: &PolygonalPrism, k: usize, m: usize, delta: f64) -> PolygonalPrism {
    let theta = 2.0 * PI * k as f64 / m as f64;
    let (dx, dy) = (delta * theta.cos(), delta * theta.sin());
    let prev = prism.vertex((k + m - 1) % m);
    let next = prism.vertex((k + 1) % m);
    let [xk, yk] = prism.vertex(k);
    PolygonalPrism::new(
        &[prev, [xk + dx, yk + dy], next, [xk - dx, yk - dy]],
        prism.z1,
        prism.z2,
        prism.magnetization,
    )
}

/// every prism follows the cumulative stacking with thickness changed by `delta`
fn shifted_stack(base: &[PolygonalPrism], delta: f64) -> Vec<PolygonalPrism> {
    base.iter()
        .enumerate()
        .map(|(i, p)| p.with_depths(p.z1 + i as f64 * delta, p.z2 + (i + 1) as f64 * delta))
        .collect()
}
