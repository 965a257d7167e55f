//! Bounded Levenberg-Marquardt inversion of total-field anomaly data for the shape
//! of a body made of stacked polygonal prisms.
//!
//! # Example
//! ```no_run
//! use RustedPolyprism::geophysics::polyprism::{MainField, ObservationPoints, ang2vec};
//! use RustedPolyprism::geophysics::model_utils::initial_cylinder;
//! use RustedPolyprism::numerical::optimization::LM_polyprism::*;
//! use nalgebra::DVector;
//!
//! let layout = PrismLayout::new(8, 2).unwrap();
//! let mag = ang2vec(3.0, -17.0, -19.0);
//! let points = ObservationPoints::regular_grid([-2000.0, 2000.0, -2000.0, 2000.0], (20, 20), 0.0);
//! let observed = DVector::zeros(400); // measured anomaly
//! let (_, m0) = initial_cylinder(&layout, 0.0, 0.0, 100.0, 300.0, 500.0, &mag).unwrap();
//! let bounds = Bounds::from_ranges(&layout, 0.0, 2000.0, -2000.0, 2000.0, -2000.0, 2000.0, 10.0, 1000.0).unwrap();
//! let problem = InversionProblem::new(
//!     points,
//!     observed,
//!     MainField::new(-17.0, -19.0),
//!     ModelSetup::new(layout, 100.0, mag),
//!     m0,
//!     bounds,
//!     DVector::from_element(10, 500.0),
//! );
//! let mut inversion = PolyprismInversion::new(problem);
//! inversion.loglevel = Some("info".to_string());
//! let result = inversion.solve().unwrap();
//! println!("{:?} after {} iterations", result.termination, result.iterations);
//! ```
use crate::geophysics::polyprism::{MainField, ObservationPoints, PolygonalPrism};
use crate::geophysics::polyprism_tf::{ForwardOperator, PolyprismTotalField};
pub use crate::numerical::optimization::bound_transform::Bounds;
use crate::numerical::optimization::forward_adapter::ForwardAdapter;
pub use crate::numerical::optimization::inversion_errors::InversionError;
use crate::numerical::optimization::inversion_errors::ensure;
pub use crate::numerical::optimization::loss::LossNorm;
use crate::numerical::optimization::param_codec::decode;
pub use crate::numerical::optimization::param_codec::PrismLayout;
pub use crate::numerical::optimization::regularization::{RegularizationStack, RegularizationWeights};
pub use crate::numerical::optimization::sensitivity::FiniteDifferenceSteps;
use crate::numerical::optimization::sensitivity::SensitivityBuilder;
use crate::somelinalg::linear_sys_diagnostics::{lu_solve_checked, poorly_conditioned};
use crate::Utils::logger::init_logger;
use crate::Utils::timer::{CustomTimer, elapsed_time};
use log::{Level, error, info, log_enabled, warn};
use nalgebra::{DVector, Vector3};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tabled::{builder::Builder, settings::Style};

/// lower limit of the damping parameter
const LAMBDA_FLOOR: f64 = 1e-15;
/// condition number of the undamped system reported at debug level
const CONDITION_LIMIT: f64 = 1e12;

/// Iteration budget and damping schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationControls {
    /// maximum number of outer iterations
    pub maxit: usize,
    /// maximum number of damping trials per outer iteration
    pub maxsteps: usize,
    /// initial damping
    pub lambda0: f64,
    /// factor the damping is multiplied or divided by
    pub dlambda: f64,
    /// relative objective change that stops the iterations
    pub tol: f64,
    /// wall-clock budget checked before every outer iteration
    pub max_duration: Option<Duration>,
}

impl Default for IterationControls {
    fn default() -> Self {
        IterationControls {
            maxit: 20,
            maxsteps: 10,
            lambda0: 1.0,
            dlambda: 10.0,
            tol: 1e-4,
            max_duration: None,
        }
    }
}

impl IterationControls {
    #[must_use]
    pub fn with_maxit(self, maxit: usize) -> Self {
        Self { maxit, ..self }
    }
    #[must_use]
    pub fn with_maxsteps(self, maxsteps: usize) -> Self {
        Self { maxsteps, ..self }
    }
    #[must_use]
    pub fn with_lambda(self, lambda0: f64, dlambda: f64) -> Self {
        Self {
            lambda0,
            dlambda,
            ..self
        }
    }
    #[must_use]
    pub fn with_tol(self, tol: f64) -> Self {
        Self { tol, ..self }
    }
    #[must_use]
    pub fn with_max_duration(self, max_duration: Duration) -> Self {
        Self {
            max_duration: Some(max_duration),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), InversionError> {
        ensure(self.maxit >= 1, "maxit must be at least 1")?;
        ensure(self.maxsteps >= 1, "maxsteps must be at least 1")?;
        ensure(
            self.lambda0 > 0.0 && self.lambda0.is_finite(),
            format!("initial damping must be positive, got {}", self.lambda0),
        )?;
        ensure(
            self.dlambda > 0.0 && self.dlambda.is_finite(),
            format!("damping factor must be positive, got {}", self.dlambda),
        )?;
        ensure(
            self.tol > 0.0 && self.tol.is_finite(),
            format!("tolerance must be positive, got {}", self.tol),
        )
    }
}

/// Fixed parameters of the model: layout, depth of the top and magnetization (A/m)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSetup {
    pub layout: PrismLayout,
    pub z0: f64,
    pub magnetization: Vector3<f64>,
}

impl ModelSetup {
    pub fn new(layout: PrismLayout, z0: f64, magnetization: Vector3<f64>) -> Self {
        ModelSetup {
            layout,
            z0,
            magnetization,
        }
    }

    pub fn model(&self, m: &DVector<f64>) -> Result<Vec<PolygonalPrism>, InversionError> {
        decode(m, &self.layout, self.z0, &self.magnetization)
    }
}

/// Everything one inversion run needs
#[derive(Debug, Clone)]
pub struct InversionProblem {
    pub points: ObservationPoints,
    pub observed: DVector<f64>,
    pub field: MainField,
    pub setup: ModelSetup,
    pub m0: DVector<f64>,
    pub bounds: Bounds,
    /// radii and origin of the outcropping cross-section (length M + 2)
    pub outcrop: DVector<f64>,
    pub steps: FiniteDifferenceSteps,
    pub controls: IterationControls,
    pub weights: RegularizationWeights,
    pub loss: LossNorm,
    /// rescale the regularization weights by the trace of the initial data Hessian
    pub normalize_weights: bool,
}

impl InversionProblem {
    /// problem with default steps and controls, no regularization and quadratic loss
    pub fn new(
        points: ObservationPoints,
        observed: DVector<f64>,
        field: MainField,
        setup: ModelSetup,
        m0: DVector<f64>,
        bounds: Bounds,
        outcrop: DVector<f64>,
    ) -> Self {
        InversionProblem {
            points,
            observed,
            field,
            setup,
            m0,
            bounds,
            outcrop,
            steps: FiniteDifferenceSteps::default(),
            controls: IterationControls::default(),
            weights: RegularizationWeights::zeros(),
            loss: LossNorm::Quadratic,
            normalize_weights: true,
        }
    }

    #[must_use]
    pub fn with_steps(self, steps: FiniteDifferenceSteps) -> Self {
        Self { steps, ..self }
    }
    #[must_use]
    pub fn with_controls(self, controls: IterationControls) -> Self {
        Self { controls, ..self }
    }
    #[must_use]
    pub fn with_weights(self, weights: RegularizationWeights) -> Self {
        Self { weights, ..self }
    }
    #[must_use]
    pub fn with_loss(self, loss: LossNorm) -> Self {
        Self { loss, ..self }
    }
    #[must_use]
    pub fn with_normalized_weights(self, normalize_weights: bool) -> Self {
        Self {
            normalize_weights,
            ..self
        }
    }

    /// every size, sign and bound check, done before any iteration
    pub fn validate(&self) -> Result<(), InversionError> {
        let layout = &self.setup.layout;
        let p = layout.n_params();
        ensure(!self.points.is_empty(), "no observation points")?;
        ensure(
            self.points.x.len() == self.points.y.len() && self.points.y.len() == self.points.z.len(),
            "observation coordinates differ in length",
        )?;
        ensure(
            self.observed.len() == self.points.len(),
            format!(
                "{} observed values for {} observation points",
                self.observed.len(),
                self.points.len()
            ),
        )?;
        ensure(
            self.observed.iter().all(|v| v.is_finite()),
            "observed data must be finite",
        )?;
        ensure(
            self.m0.len() == p,
            format!(
                "m0 has length {}, expected L*(M+2)+1 = {}",
                self.m0.len(),
                p
            ),
        )?;
        ensure(
            self.bounds.len() == p,
            format!("bounds have length {}, expected {}", self.bounds.len(), p),
        )?;
        ensure(
            self.bounds.contains(&self.m0),
            "the initial model lies outside the bounds",
        )?;
        ensure(
            (0..p)
                .filter(|i| layout.is_radius(*i) || *i == layout.dz_index())
                .all(|i| self.m0[i] > 0.0),
            "initial radii and thickness must be positive",
        )?;
        ensure(
            self.outcrop.len() == layout.block(),
            format!(
                "outcrop vector has length {}, expected M + 2 = {}",
                self.outcrop.len(),
                layout.block()
            ),
        )?;
        ensure(
            self.setup.z0.is_finite() && self.setup.magnetization.iter().all(|v| v.is_finite()),
            "depth of the top and magnetization must be finite",
        )?;
        self.steps.validate()?;
        self.controls.validate()?;
        RegularizationWeights::new(self.weights.alpha)?;
        Ok(())
    }
}

/// Reasons for terminating the inversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// relative change of the objective below `tol`
    Converged,
    /// no damping level improved the objective; the last trial was accepted anyway
    NoImprovement,
    MaxIterations,
    TimeBudgetExceeded,
    /// the damped system could not be solved at any damping level
    IllConditioned,
}

impl TerminationReason {
    pub fn was_successful(&self) -> bool {
        matches!(self, TerminationReason::Converged)
    }
}

/// Objective, data misfit, parameters, model and residual after every accepted iteration.
/// Entry 0 is the initial model.
#[derive(Debug, Clone, Default)]
pub struct InversionHistory {
    pub objectives: Vec<f64>,
    pub misfits: Vec<f64>,
    pub parameters: Vec<DVector<f64>>,
    pub models: Vec<Vec<PolygonalPrism>>,
    pub residuals: Vec<DVector<f64>>,
}

impl InversionHistory {
    fn push(
        &mut self,
        objective: f64,
        misfit: f64,
        m: &DVector<f64>,
        model: &[PolygonalPrism],
        residual: &DVector<f64>,
    ) {
        self.objectives.push(objective);
        self.misfits.push(misfit);
        self.parameters.push(m.clone());
        self.models.push(model.to_vec());
        self.residuals.push(residual.clone());
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InversionResult {
    pub fitted_data: DVector<f64>,
    pub parameters: DVector<f64>,
    pub model: Vec<PolygonalPrism>,
    pub history: InversionHistory,
    /// residual weights prepared for the next outer iteration
    pub residual_weights: DVector<f64>,
    /// regularization weights actually used
    pub scaled_weights: RegularizationWeights,
    pub termination: TerminationReason,
    pub iterations: usize,
    pub forward_calls: usize,
}

impl InversionResult {
    pub fn final_objective(&self) -> f64 {
        self.history.objectives.last().copied().unwrap_or(f64::NAN)
    }

    pub fn final_residual(&self) -> Option<&DVector<f64>> {
        self.history.residuals.last()
    }
}

/// accepted trial of the inner damping loop
struct Trial {
    m: DVector<f64>,
    model: Vec<PolygonalPrism>,
    predicted: DVector<f64>,
    residual: DVector<f64>,
    misfit: f64,
    objective: f64,
}

pub struct PolyprismInversion {
    pub problem: InversionProblem,
    pub operator: Box<dyn ForwardOperator>,
    /// "debug", "info", "warn", "error", "off" or "none"
    pub loglevel: Option<String>,
    pub log_to_file: bool,
    pub calc_statistics: HashMap<String, usize>,
    pub custom_timer: CustomTimer,
    pub result: Option<InversionResult>,
}

impl PolyprismInversion {
    pub fn new(problem: InversionProblem) -> Self {
        PolyprismInversion {
            problem,
            operator: Box::new(PolyprismTotalField),
            loglevel: Some("info".to_string()),
            log_to_file: false,
            calc_statistics: HashMap::new(),
            custom_timer: CustomTimer::new(),
            result: None,
        }
    }

    #[must_use]
    pub fn with_operator(self, operator: Box<dyn ForwardOperator>) -> Self {
        Self { operator, ..self }
    }

    // wrapper around solver function to implement logging
    pub fn solve(&mut self) -> Result<InversionResult, InversionError> {
        init_logger(&self.loglevel, self.log_to_file)?;
        let res = self.solver();
        match &res {
            Ok(result) => info!(" \n \n Inversion ended: {:?}", result.termination),
            Err(e) => error!("Inversion failed: {}", e),
        }
        res
    }

    pub fn solver(&mut self) -> Result<InversionResult, InversionError> {
        self.custom_timer.start();
        let begin = Instant::now();
        let result = self.main_loop()?;
        let end = begin.elapsed();
        elapsed_time(end);
        self.custom_timer.get_all();
        self.calc_statistics
            .insert("time elapsed, ms".to_string(), end.as_millis() as usize);
        self.calc_statistics();
        self.result = Some(result.clone());
        Ok(result)
    }

    pub fn get_result(&self) -> Option<&InversionResult> {
        self.result.as_ref()
    }

    fn main_loop(&mut self) -> Result<InversionResult, InversionError> {
        let problem = &self.problem;
        problem.validate()?;
        let setup = &problem.setup;
        let layout = setup.layout;
        let (bounds, controls, loss) = (&problem.bounds, &problem.controls, problem.loss);
        let n_data = problem.points.len();
        let n_params = layout.n_params();
        let scale = 2.0 / n_data as f64;

        let adapter = ForwardAdapter::new(self.operator.as_ref(), &problem.points, problem.field);
        let sensitivity = SensitivityBuilder::new(&adapter, layout, problem.steps);
        let stack = RegularizationStack::new(&layout, &problem.outcrop)?;
        let timer = &mut self.custom_timer;

        let mut m = problem.m0.clone();
        let mut model = setup.model(&m)?;
        timer.fun_tic();
        let mut predicted = adapter.predict(&model);
        timer.fun_tac();
        let mut residual = &problem.observed - &predicted;
        let mut residual_weights = DVector::from_element(n_data, 1.0);

        timer.jac_tic();
        let mut jac = sensitivity.build(&model);
        timer.jac_tac();
        let mut jacobian_builds = 1;

        let scaled_weights = if problem.normalize_weights {
            let th = scale * jac.norm_squared();
            stack.normalize(&problem.weights, th)
        } else {
            problem.weights
        };

        let mut misfit = loss.misfit(&residual);
        let mut phi0 = misfit + stack.value(&m, &scaled_weights);
        let mut history = InversionHistory::default();
        history.push(phi0, misfit, &m, &model, &residual);
        info!(
            "inversion of {} data for {} parameters ({} prisms, {} vertices), loss {}, initial objective {:e}",
            n_data, n_params, layout.prisms, layout.vertices, loss, phi0
        );

        let mut lambda = controls.lambda0;
        let mut termination = TerminationReason::MaxIterations;
        let mut iterations = 0;
        let mut failed_solves = 0;
        let start = Instant::now();

        for it in 0..controls.maxit {
            if let Some(budget) = controls.max_duration {
                if start.elapsed() >= budget {
                    warn!("time budget of {:?} exhausted before iteration {}", budget, it);
                    termination = TerminationReason::TimeBudgetExceeded;
                    break;
                }
            }
            if it > 0 {
                timer.jac_tic();
                jac = sensitivity.build(&model);
                timer.jac_tac();
                jacobian_builds += 1;
            }
            let mt = bounds.forward(&m)?;

            // weighted Gauss-Newton system plus regularization
            let mut jac_t_w = jac.transpose();
            for (i, mut col) in jac_t_w.column_iter_mut().enumerate() {
                col *= residual_weights[i];
            }
            let mut hessian = (&jac_t_w * &jac) * scale;
            let mut gradient = (&jac_t_w * &residual) * (-scale);
            stack.add_hessian(&mut hessian, &scaled_weights);
            stack.add_gradient(&mut gradient, &m, &scaled_weights);

            let curvature = bounds.curvature_scaling(&m);
            for (j, mut col) in hessian.column_iter_mut().enumerate() {
                col *= curvature[j];
            }
            let precond = hessian
                .diagonal()
                .map(|d| if d > 0.0 && d.is_finite() { 1.0 / d.sqrt() } else { 1.0 });
            // D H D
            let mut scaled_hessian = hessian;
            for (j, mut col) in scaled_hessian.column_iter_mut().enumerate() {
                col.component_mul_assign(&precond);
                col *= precond[j];
            }
            let rhs = -gradient.component_mul(&precond);
            if log_enabled!(Level::Debug) {
                poorly_conditioned(&scaled_hessian, CONDITION_LIMIT);
            }

            let mut trial: Option<Trial> = None;
            let mut accepted = false;
            for it_marq in 0..controls.maxsteps {
                let mut system = scaled_hessian.clone();
                for i in 0..n_params {
                    system[(i, i)] += lambda;
                }
                timer.linear_system_tic();
                let solution = lu_solve_checked(system, &rhs);
                timer.linear_system_tac();
                let Some(x) = solution else {
                    warn!(
                        "damped system not solvable at it {}, it_marq {}, lambda {:e}; increasing damping",
                        it, it_marq, lambda
                    );
                    failed_solves += 1;
                    lambda *= controls.dlambda;
                    continue;
                };
                let step = x.component_mul(&precond);
                let m_est = bounds.inverse(&(&mt + step));
                let model_est = setup.model(&m_est)?;
                timer.fun_tic();
                let predicted_est = adapter.predict(&model_est);
                timer.fun_tac();
                let residual_est = &problem.observed - &predicted_est;
                let misfit_est = loss.misfit(&residual_est);
                let phi = misfit_est + stack.value(&m_est, &scaled_weights);
                let dphi = phi - phi0;
                info!(
                    "it: {}, it_marq: {}, lambda: {:e}, initial objective: {:e}, trial objective: {:e}",
                    it, it_marq, lambda, phi0, phi
                );
                trial = Some(Trial {
                    m: m_est,
                    model: model_est,
                    predicted: predicted_est,
                    residual: residual_est,
                    misfit: misfit_est,
                    objective: phi,
                });
                if dphi <= 0.0 {
                    accepted = true;
                    lambda = (lambda / controls.dlambda).max(LAMBDA_FLOOR);
                    break;
                }
                lambda *= controls.dlambda;
            }

            let Some(trial) = trial else {
                if it == 0 {
                    return Err(InversionError::IllConditionedLinearSystem(format!(
                        "no damping level from {:e} to {:e} gave a solvable system",
                        controls.lambda0, lambda
                    )));
                }
                warn!("damped system not solvable at iteration {}, stopping", it);
                termination = TerminationReason::IllConditioned;
                break;
            };
            iterations += 1;
            m = trial.m;
            model = trial.model;
            predicted = trial.predicted;
            residual = trial.residual;
            misfit = trial.misfit;
            residual_weights = loss.weights(&residual);

            if !accepted {
                warn!(
                    "no damping level improved the objective at iteration {}; keeping the last trial",
                    it
                );
                history.push(phi0, misfit, &m, &model, &residual);
                termination = TerminationReason::NoImprovement;
                break;
            }
            let phi = trial.objective;
            history.push(phi, misfit, &m, &model, &residual);
            let relative_change = if phi0 == 0.0 {
                0.0
            } else {
                (phi - phi0).abs() / phi0
            };
            phi0 = phi;
            if relative_change < controls.tol {
                info!(
                    "converged at iteration {}: relative objective change {:e}",
                    it, relative_change
                );
                termination = TerminationReason::Converged;
                break;
            }
        }

        self.calc_statistics
            .insert("number of iterations".to_string(), iterations);
        self.calc_statistics
            .insert("forward operator calls".to_string(), adapter.calls());
        self.calc_statistics
            .insert("jacobian builds".to_string(), jacobian_builds);
        self.calc_statistics
            .insert("failed linear solves".to_string(), failed_solves);
        self.calc_statistics
            .insert("number of parameters".to_string(), n_params);
        self.calc_statistics
            .insert("number of observations".to_string(), n_data);

        Ok(InversionResult {
            fitted_data: predicted,
            parameters: m,
            model,
            history,
            residual_weights,
            scaled_weights,
            termination,
            iterations,
            forward_calls: adapter.calls(),
        })
    }

    fn calc_statistics(&self) {
        let stats = self.calc_statistics.clone();
        let mut table = Builder::from(stats).build();
        table.with(Style::modern_rounded());
        info!("\n \n CALC STATISTICS \n \n {}", table);
    }
}

/// Shortest way to run an inversion without logging
pub fn invert(problem: InversionProblem) -> Result<InversionResult, InversionError> {
    let mut inversion = PolyprismInversion::new(problem);
    inversion.loglevel = Some("off".to_string());
    inversion.solve()
}
