//! Call boundary between the inversion and the forward operator.
use crate::geophysics::polyprism::{MainField, ObservationPoints, PolygonalPrism};
use crate::geophysics::polyprism_tf::ForwardOperator;
use nalgebra::DVector;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Binds a forward operator to one survey (points and main-field direction) and
/// counts how many times it was evaluated. Safe to share between threads.
pub struct ForwardAdapter<'a> {
    operator: &'a dyn ForwardOperator,
    points: &'a ObservationPoints,
    field: MainField,
    calls: AtomicUsize,
}

impl<'a> ForwardAdapter<'a> {
    pub fn new(
        operator: &'a dyn ForwardOperator,
        points: &'a ObservationPoints,
        field: MainField,
    ) -> Self {
        ForwardAdapter {
            operator,
            points,
            field,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn predict(&self, prisms: &[PolygonalPrism]) -> DVector<f64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.operator.total_field(self.points, prisms, &self.field)
    }

    pub fn n_data(&self) -> usize {
        self.points.len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geophysics::polyprism_tf::PolyprismTotalField;
    use nalgebra::Vector3;

    #[test]
    fn counts_calls_and_matches_operator() {
        let points = ObservationPoints::regular_grid([-500.0, 500.0, -500.0, 500.0], (4, 3), -50.0);
        let field = MainField::new(-17.0, -19.0);
        let prism = PolygonalPrism::new(
            &[[-100.0, -100.0], [100.0, -100.0], [100.0, 100.0], [-100.0, 100.0]],
            100.0,
            300.0,
            Vector3::new(1.0, 0.5, 2.0),
        );
        let adapter = ForwardAdapter::new(&PolyprismTotalField, &points, field);
        let a = adapter.predict(std::slice::from_ref(&prism));
        let b = adapter.predict(std::slice::from_ref(&prism));
        assert_eq!(a, b);
        assert_eq!(adapter.calls(), 2);
        assert_eq!(adapter.n_data(), 12);
        assert_eq!(a, PolyprismTotalField.total_field(&points, &[prism], &field));
    }
}
