//! Multiple inversions over a grid of fixed parameters (depth of the top and
//! magnetization intensity), used to choose the pair that fits the data best.
use crate::geophysics::model_utils::FixedParameters;
use crate::geophysics::polyprism::ang2vec;
use crate::numerical::optimization::LM_polyprism::{
    InversionProblem, InversionResult, ModelSetup, invert,
};
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use log::info;
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Runs `problem` once per set of fixed parameters, in parallel, keeping the order
pub fn run_fixed(
    problem: &InversionProblem,
    fixed: &[FixedParameters],
) -> Result<Vec<InversionResult>, InversionError> {
    fixed
        .par_iter()
        .map(|f| {
            let mut p = problem.clone();
            p.setup = ModelSetup::new(p.setup.layout, f.z0, f.magnetization);
            invert(p)
        })
        .collect()
}

/// Results of the inversions for every `(z0, intensity)` pair, row-major: the run
/// for `z0_values[i]` and `intensity_values[j]` is `results[i * m + j]`
pub struct InversionGrid {
    pub z0_values: Vec<f64>,
    pub intensity_values: Vec<f64>,
    pub results: Vec<InversionResult>,
}

impl InversionGrid {
    /// magnetization direction is fixed by `inc`, `dec` (degrees)
    pub fn run(
        problem: &InversionProblem,
        z0_values: &[f64],
        intensity_values: &[f64],
        inc: f64,
        dec: f64,
    ) -> Result<Self, InversionError> {
        ensure(
            !z0_values.is_empty() && !intensity_values.is_empty(),
            "the grid needs at least one depth and one intensity",
        )?;
        let fixed: Vec<FixedParameters> = z0_values
            .iter()
            .flat_map(|z0| {
                intensity_values.iter().map(move |intensity| FixedParameters {
                    z0: *z0,
                    magnetization: ang2vec(*intensity, inc, dec),
                })
            })
            .collect();
        info!(
            "running {} inversions ({} depths x {} intensities)",
            fixed.len(),
            z0_values.len(),
            intensity_values.len()
        );
        let results = run_fixed(problem, &fixed)?;
        Ok(InversionGrid {
            z0_values: z0_values.to_vec(),
            intensity_values: intensity_values.to_vec(),
            results,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.z0_values.len(), self.intensity_values.len())
    }

    fn matrix(&self, value: impl Fn(&InversionResult) -> f64) -> DMatrix<f64> {
        let (n, m) = self.shape();
        DMatrix::from_fn(n, m, |i, j| value(&self.results[i * m + j]))
    }

    /// final objective of every run
    pub fn goal_matrix(&self) -> DMatrix<f64> {
        self.matrix(|r| r.final_objective())
    }

    /// mean squared final residual of every run
    pub fn misfit_matrix(&self) -> DMatrix<f64> {
        self.matrix(|r| {
            r.final_residual()
                .map(|res| res.norm_squared() / res.len() as f64)
                .unwrap_or(f64::NAN)
        })
    }

    /// mean absolute final residual of every run
    pub fn l1_misfit_matrix(&self) -> DMatrix<f64> {
        self.matrix(|r| {
            r.final_residual()
                .map(|res| res.iter().map(|v| v.abs()).sum::<f64>() / res.len() as f64)
                .unwrap_or(f64::NAN)
        })
    }

    /// `(z0, intensity)` of the run with the smallest entry of `matrix`
    pub fn best(&self, matrix: &DMatrix<f64>) -> Option<(f64, f64)> {
        let (n, m) = self.shape();
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            for j in 0..m {
                let v = matrix[(i, j)];
                if v.is_finite() && best.is_none_or(|(_, _, b)| v < b) {
                    best = Some((i, j, v));
                }
            }
        }
        best.map(|(i, j, _)| (self.z0_values[i], self.intensity_values[j]))
    }
}
