#[cfg(test)]
mod tests {
    use crate::geophysics::polyprism::{MainField, ObservationPoints, PolygonalPrism, ang2vec};
    use crate::geophysics::polyprism_tf::{ForwardOperator, PolyprismTotalField};
    use crate::numerical::optimization::LM_polyprism::*;
    use crate::numerical::optimization::loss::L1_GUARD;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const INC: f64 = -17.0;
    const DEC: f64 = -19.0;

    /// noiseless survey over a single square prism (radius 500, top 100, thickness 400)
    fn square_survey() -> (ObservationPoints, DVector<f64>, ModelSetup) {
        let layout = PrismLayout::new(4, 1).unwrap();
        let setup = ModelSetup::new(layout, 100.0, ang2vec(3.0, INC, DEC));
        let truth = DVector::from_vec(vec![500.0, 500.0, 500.0, 500.0, 0.0, 0.0, 400.0]);
        let points = ObservationPoints::regular_grid([-2000.0, 2000.0, -2000.0, 2000.0], (15, 15), 0.0);
        let observed = PolyprismTotalField.total_field(
            &points,
            &setup.model(&truth).unwrap(),
            &MainField::new(INC, DEC),
        );
        (points, observed, setup)
    }

    fn square_problem() -> InversionProblem {
        let (points, observed, setup) = square_survey();
        let layout = setup.layout;
        let m0 = DVector::from_vec(vec![440.0, 560.0, 470.0, 540.0, 50.0, -50.0, 350.0]);
        let bounds =
            Bounds::from_ranges(&layout, 10.0, 2000.0, -1000.0, 1000.0, -1000.0, 1000.0, 10.0, 2000.0)
                .unwrap();
        InversionProblem::new(
            points,
            observed,
            MainField::new(INC, DEC),
            setup,
            m0,
            bounds,
            DVector::from_vec(vec![500.0, 500.0, 500.0, 500.0, 0.0, 0.0]),
        )
        .with_controls(
            IterationControls::default()
                .with_maxit(20)
                .with_maxsteps(10)
                .with_tol(1e-6),
        )
    }

    #[test]
    fn quadratic_loss_recovers_the_square() {
        let result = invert(square_problem()).unwrap();
        let misfits = &result.history.misfits;
        assert!(
            *misfits.last().unwrap() <= misfits[0] / 100.0,
            "misfit went from {} to {}",
            misfits[0],
            misfits.last().unwrap()
        );
        for k in 0..4 {
            assert_relative_eq!(result.parameters[k], 500.0, max_relative = 0.05);
        }
        assert!(result.iterations >= 1);
        assert_eq!(result.fitted_data.len(), 225);
        assert_eq!(result.model.len(), 1);
    }

    #[test]
    fn accepted_objectives_never_increase() {
        let result = invert(square_problem()).unwrap();
        let history = &result.history;
        assert_eq!(history.len(), result.iterations + 1);
        assert_eq!(history.models.len(), history.len());
        assert_eq!(history.residuals.len(), history.len());
        assert_eq!(history.parameters.len(), history.len());
        for pair in history.objectives.windows(2) {
            assert!(pair[1] <= pair[0], "objective increased: {:?}", pair);
        }
        // quadratic loss keeps unit residual weights
        assert_eq!(result.residual_weights, DVector::from_element(225, 1.0));
    }

    #[test]
    fn absolute_loss_reweights_with_the_accepted_residual() {
        let mut problem = square_problem().with_loss(LossNorm::Absolute);
        problem.controls = problem.controls.with_maxit(1);
        let result = invert(problem).unwrap();
        assert_eq!(result.iterations, 1);
        let residual = &result.history.residuals[1];
        for (w, r) in result.residual_weights.iter().zip(residual.iter()) {
            assert_relative_eq!(*w, 1.0 / (r.abs() + L1_GUARD), max_relative = 1e-12);
        }
        assert_relative_eq!(
            result.history.misfits[1],
            residual.iter().map(|r| r.abs()).sum::<f64>() / 225.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn initial_entry_is_the_starting_model() {
        let problem = square_problem();
        let m0 = problem.m0.clone();
        let result = invert(problem).unwrap();
        assert_eq!(result.history.parameters[0], m0);
        assert!(result.forward_calls > result.iterations);
    }

    #[test]
    fn regularization_weights_are_normalized_by_hessian_traces() {
        let (points, observed, setup) = square_survey();
        let layout = PrismLayout::new(4, 2).unwrap();
        let setup = ModelSetup::new(layout, setup.z0, setup.magnetization);
        let m0 = DVector::from_vec(vec![
            450.0, 520.0, 480.0, 530.0, 20.0, -20.0, 430.0, 500.0, 460.0, 510.0, 10.0, 0.0, 200.0,
        ]);
        let bounds =
            Bounds::from_ranges(&layout, 10.0, 2000.0, -1000.0, 1000.0, -1000.0, 1000.0, 10.0, 2000.0)
                .unwrap();
        let problem = InversionProblem::new(
            points,
            observed,
            MainField::new(INC, DEC),
            setup,
            m0,
            bounds,
            DVector::from_vec(vec![500.0, 500.0, 500.0, 500.0, 0.0, 0.0]),
        )
        .with_weights(RegularizationWeights::new([1e-4; 7]).unwrap())
        .with_controls(IterationControls::default().with_maxit(3));
        let result = invert(problem).unwrap();
        let alpha = result.scaled_weights.alpha;
        // traces: phi_1 4*8, phi_2 2*8, phi_3 2*6, phi_4 4, phi_5 2*4, phi_6 2*8, phi_7 2
        assert_relative_eq!(alpha[0] / alpha[5], 0.5, max_relative = 1e-12);
        assert_relative_eq!(alpha[1] / alpha[5], 1.0, max_relative = 1e-12);
        assert_relative_eq!(alpha[6] / alpha[5], 8.0, max_relative = 1e-12);
        for pair in result.history.objectives.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }

    #[test]
    fn unnormalized_weights_are_used_as_given() {
        let weights = RegularizationWeights::new([0.0, 0.0, 1e-6, 0.0, 0.0, 1e-8, 0.0]).unwrap();
        let problem = square_problem()
            .with_weights(weights)
            .with_normalized_weights(false)
            .with_controls(IterationControls::default().with_maxit(2));
        let result = invert(problem).unwrap();
        assert_eq!(result.scaled_weights, weights);
    }

    #[test]
    fn preconditions_are_checked_before_iterating() {
        let mut wrong_m0 = square_problem();
        wrong_m0.m0 = DVector::from_element(6, 100.0);
        assert!(matches!(
            invert(wrong_m0),
            Err(InversionError::PreconditionViolation(_))
        ));

        let mut wrong_data = square_problem();
        wrong_data.observed = DVector::zeros(10);
        assert!(invert(wrong_data).is_err());

        let bad_tol = square_problem().with_controls(IterationControls::default().with_tol(0.0));
        assert!(invert(bad_tol).is_err());

        let bad_lambda =
            square_problem().with_controls(IterationControls::default().with_lambda(1.0, -10.0));
        assert!(invert(bad_lambda).is_err());

        let mut outside = square_problem();
        outside.m0[0] = 5000.0;
        assert!(invert(outside).is_err());

        let mut short_outcrop = square_problem();
        short_outcrop.outcrop = DVector::zeros(3);
        assert!(invert(short_outcrop).is_err());

        let mut inversion = PolyprismInversion::new(square_problem());
        inversion.loglevel = Some("chatty".to_string());
        assert!(inversion.solve().is_err());
    }

    #[test]
    fn time_budget_stops_before_the_first_iteration() {
        let problem = square_problem()
            .with_controls(IterationControls::default().with_max_duration(Duration::ZERO));
        let result = invert(problem).unwrap();
        assert_eq!(result.termination, TerminationReason::TimeBudgetExceeded);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.history.len(), 1);
    }

    struct NanOperator;

    impl ForwardOperator for NanOperator {
        fn total_field(
            &self,
            points: &ObservationPoints,
            _prisms: &[PolygonalPrism],
            _field: &MainField,
        ) -> DVector<f64> {
            DVector::from_element(points.len(), f64::NAN)
        }
    }

    #[test]
    fn unsolvable_systems_are_reported() {
        let problem = square_problem().with_normalized_weights(false);
        let mut inversion = PolyprismInversion::new(problem).with_operator(Box::new(NanOperator));
        inversion.loglevel = Some("off".to_string());
        assert!(matches!(
            inversion.solve(),
            Err(InversionError::IllConditionedLinearSystem(_))
        ));
    }

    /// exact field shifted by a constant that grows with every call
    struct DriftingOperator {
        calls: AtomicUsize,
    }

    impl ForwardOperator for DriftingOperator {
        fn total_field(
            &self,
            points: &ObservationPoints,
            prisms: &[PolygonalPrism],
            field: &MainField,
        ) -> DVector<f64> {
            let k = self.calls.fetch_add(1, Ordering::SeqCst) as f64;
            PolyprismTotalField
                .total_field(points, prisms, field)
                .add_scalar(1.0e5 * k)
        }
    }

    #[test]
    fn last_trial_is_kept_when_no_damping_level_improves() {
        let problem = square_problem()
            .with_controls(IterationControls::default().with_maxsteps(3));
        let m0 = problem.m0.clone();
        let observed = problem.observed.clone();
        let operator = DriftingOperator {
            calls: AtomicUsize::new(0),
        };
        let mut inversion = PolyprismInversion::new(problem).with_operator(Box::new(operator));
        inversion.loglevel = Some("off".to_string());
        let result = inversion.solve().unwrap();

        assert_eq!(result.termination, TerminationReason::NoImprovement);
        assert!(!result.termination.was_successful());
        assert_eq!(result.iterations, 1);
        let history = &result.history;
        assert_eq!(history.len(), 2);
        // recorded with the objective it failed to beat
        assert_eq!(history.objectives[1], history.objectives[0]);
        // the returned model is the last candidate, not the starting one
        assert_eq!(result.parameters, history.parameters[1]);
        assert_ne!(result.parameters, m0);
        assert_eq!(history.residuals[1], &observed - &result.fitted_data);
        assert_eq!(result.model, history.models[1]);
    }

    /// exact field offset by a large constant on the first call, NaN once the
    /// first iteration is over
    struct FailingAfterFirstIteration {
        calls: AtomicUsize,
        healthy_calls: usize,
    }

    impl ForwardOperator for FailingAfterFirstIteration {
        fn total_field(
            &self,
            points: &ObservationPoints,
            prisms: &[PolygonalPrism],
            field: &MainField,
        ) -> DVector<f64> {
            let k = self.calls.fetch_add(1, Ordering::SeqCst);
            let tf = PolyprismTotalField.total_field(points, prisms, field);
            if k == 0 {
                tf.add_scalar(1.0e5)
            } else if k < self.healthy_calls {
                tf
            } else {
                DVector::from_element(points.len(), f64::NAN)
            }
        }
    }

    #[test]
    fn unsolvable_system_after_progress_keeps_the_accepted_model() {
        // one trial per iteration; the initial evaluation, the 10 calls of the
        // 4-vertex Jacobian and the first trial are healthy
        let problem = square_problem()
            .with_controls(IterationControls::default().with_maxsteps(1));
        let operator = FailingAfterFirstIteration {
            calls: AtomicUsize::new(0),
            healthy_calls: 12,
        };
        let mut inversion = PolyprismInversion::new(problem).with_operator(Box::new(operator));
        inversion.loglevel = Some("off".to_string());
        let result = inversion.solve().unwrap();

        assert_eq!(result.termination, TerminationReason::IllConditioned);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.history.len(), 2);
        assert!(result.history.objectives[1] < result.history.objectives[0]);
        assert_eq!(result.parameters, result.history.parameters[1]);
        assert!(result.fitted_data.iter().all(|v| v.is_finite()));
    }
}
