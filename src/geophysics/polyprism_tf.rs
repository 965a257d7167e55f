//! Total-field anomaly of uniformly magnetized vertical polygonal prisms.
//!
//! The field of a uniformly magnetized body equals the field of the surface
//! charge `sigma = M.n` spread on its boundary. For one planar face with unit
//! normal `n`, seen from the point `p`,
//!
//! ```text
//! integral (p - x')/|p - x'|^3 dS = sum_edges nu_e * integral_e ds/R  -  n * Omega
//! ```
//!
//! where `nu_e` is the in-plane outward normal of edge `e` and `Omega` the signed
//! solid angle subtended by the face. Both pieces have closed forms, and both are
//! linear in the oriented vertex chain: the field of polygon A minus the field of
//! polygon B is the field of the oriented patch between them.
use crate::geophysics::polyprism::{CM, MainField, ObservationPoints, PolygonalPrism, T2NT};
use nalgebra::{DVector, Vector3};
use rayon::prelude::*;

/// Forward operator: predicted total-field anomaly (nT) at the observation points
pub trait ForwardOperator: Send + Sync {
    fn total_field(
        &self,
        points: &ObservationPoints,
        prisms: &[PolygonalPrism],
        field: &MainField,
    ) -> DVector<f64>;
}

/// Closed-form total-field anomaly of stacked polygonal prisms
#[derive(Debug, Clone, Copy, Default)]
pub struct PolyprismTotalField;

impl ForwardOperator for PolyprismTotalField {
    fn total_field(
        &self,
        points: &ObservationPoints,
        prisms: &[PolygonalPrism],
        field: &MainField,
    ) -> DVector<f64> {
        let f = field.direction();
        let values: Vec<f64> = (0..points.len())
            .into_par_iter()
            .map(|i| {
                let p = points.point(i);
                let b: Vector3<f64> = prisms.iter().map(|prism| prism_field(prism, &p)).sum();
                f.dot(&b) * CM * T2NT
            })
            .collect();
        DVector::from_vec(values)
    }
}

/// Magnetic induction of one prism at `p`, without the `mu0/4pi` factor
pub fn prism_field(prism: &PolygonalPrism, p: &Vector3<f64>) -> Vector3<f64> {
    let n = prism.nverts();
    let mag = prism.magnetization;
    if n < 3 || prism.z2 == prism.z1 || mag.norm_squared() == 0.0 {
        return Vector3::zeros();
    }
    let (z1, z2) = (prism.z1, prism.z2);
    let bottom: Vec<Vector3<f64>> = (0..n)
        .map(|k| Vector3::new(prism.x[k], prism.y[k], z2))
        .collect();
    let top: Vec<Vector3<f64>> = (0..n)
        .rev()
        .map(|k| Vector3::new(prism.x[k], prism.y[k], z1))
        .collect();
    let down = Vector3::new(0.0, 0.0, 1.0);

    let mut b = face_field(&bottom, &down, p) * mag.dot(&down);
    b += face_field(&top, &(-down), p) * (-mag.z);

    // side faces, outward for counter-clockwise vertices
    let sign = if z2 > z1 { 1.0 } else { -1.0 };
    for k in 0..n {
        let next = (k + 1) % n;
        let ex = prism.x[next] - prism.x[k];
        let ey = prism.y[next] - prism.y[k];
        let len = ex.hypot(ey);
        if len == 0.0 {
            continue;
        }
        let normal = Vector3::new(ey, -ex, 0.0) * (sign / len);
        let sigma = mag.dot(&normal);
        if sigma == 0.0 {
            continue;
        }
        let face = [
            Vector3::new(prism.x[k], prism.y[k], z1),
            Vector3::new(prism.x[next], prism.y[next], z1),
            Vector3::new(prism.x[next], prism.y[next], z2),
            Vector3::new(prism.x[k], prism.y[k], z2),
        ];
        b += face_field(&face, &normal, p) * sigma;
    }
    b
}

/// integral over a planar face of (p - x')/|p - x'|^3 for a unit surface density
fn face_field(vertices: &[Vector3<f64>], normal: &Vector3<f64>, p: &Vector3<f64>) -> Vector3<f64> {
    let n = vertices.len();
    let mut tangential = Vector3::zeros();
    for k in 0..n {
        let a = &vertices[k];
        let b = &vertices[(k + 1) % n];
        let edge = b - a;
        let len = edge.norm();
        if len == 0.0 {
            continue;
        }
        let nu = (edge / len).cross(normal);
        tangential += nu * segment_inverse_distance(a, b, p);
    }
    let r0 = vertices[0] - p;
    let mut omega = 0.0;
    for k in 1..n - 1 {
        omega += triangle_solid_angle(&r0, &(vertices[k] - p), &(vertices[k + 1] - p));
    }
    tangential - normal * omega
}

/// integral of 1/|x - p| along the segment from `a` to `b`
fn segment_inverse_distance(a: &Vector3<f64>, b: &Vector3<f64>, p: &Vector3<f64>) -> f64 {
    let u = (b - a).normalize();
    let ra = a - p;
    let rb = b - p;
    let (na, nb) = (ra.norm(), rb.norm());
    let (sa, sb) = (ra.dot(&u), rb.dot(&u));
    // (R + s)(R - s) is the same at both ends: pick the form without cancellation
    if sa + sb >= 0.0 {
        ((nb + sb) / (na + sa)).ln()
    } else {
        ((na - sa) / (nb - sb)).ln()
    }
}

/// Van Oosterom & Strackee signed solid angle of a triangle seen from the origin
fn triangle_solid_angle(r1: &Vector3<f64>, r2: &Vector3<f64>, r3: &Vector3<f64>) -> f64 {
    let (n1, n2, n3) = (r1.norm(), r2.norm(), r3.norm());
    let numerator = r1.dot(&r2.cross(r3));
    let denominator = n1 * n2 * n3 + r1.dot(r2) * n3 + r1.dot(r3) * n2 + r2.dot(r3) * n1;
    2.0 * numerator.atan2(denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geophysics::polyprism::ang2vec;
    use approx::assert_relative_eq;

    fn square(half: f64, z1: f64, z2: f64, mag: Vector3<f64>) -> PolygonalPrism {
        PolygonalPrism::new(
            &[[-half, -half], [half, -half], [half, half], [-half, half]],
            z1,
            z2,
            mag,
        )
    }

    #[test]
    fn far_field_matches_dipole() {
        let mag = ang2vec(2.0, 35.0, 20.0);
        let prism = square(10.0, 990.0, 1010.0, mag);
        let moment = mag * prism.volume();
        let p = Vector3::new(300.0, -200.0, 0.0);
        let r = p - Vector3::new(0.0, 0.0, 1000.0);
        let rn: f64 = r.norm();
        let rhat = r / rn;
        let dipole = (rhat * (3.0 * moment.dot(&rhat)) - moment) / rn.powi(3);
        let b = prism_field(&prism, &p);
        assert!((b - dipole).norm() / dipole.norm() < 1e-3);
    }

    #[test]
    fn positive_anomaly_above_vertically_magnetized_body() {
        let prism = square(100.0, 100.0, 300.0, ang2vec(1.0, 90.0, 0.0));
        let points = ObservationPoints::regular_grid([0.0, 0.0, 0.0, 0.0], (1, 1), 0.0);
        let tf = PolyprismTotalField.total_field(&points, &[prism], &MainField::new(90.0, 0.0));
        assert!(tf[0] > 0.0);
    }

    #[test]
    fn clockwise_prism_is_the_negative_of_counter_clockwise() {
        let mag = ang2vec(3.0, -17.0, -19.0);
        let ccw = square(150.0, 50.0, 400.0, mag);
        let mut cw = ccw.clone();
        cw.x.reverse();
        cw.y.reverse();
        let p = Vector3::new(230.0, 75.0, -10.0);
        assert_relative_eq!(
            prism_field(&cw, &p),
            -prism_field(&ccw, &p),
            epsilon = 1e-12
        );
    }

    #[test]
    fn field_is_additive_over_split_prisms() {
        let mag = ang2vec(3.0, -17.0, -19.0);
        let whole = square(150.0, 50.0, 400.0, mag);
        let upper = whole.with_depths(50.0, 200.0);
        let lower = whole.with_depths(200.0, 400.0);
        let left = PolygonalPrism::new(
            &[[-150.0, -150.0], [0.0, -150.0], [0.0, 150.0], [-150.0, 150.0]],
            50.0,
            400.0,
            mag,
        );
        let right = PolygonalPrism::new(
            &[[0.0, -150.0], [150.0, -150.0], [150.0, 150.0], [0.0, 150.0]],
            50.0,
            400.0,
            mag,
        );
        let p = Vector3::new(-80.0, 310.0, 0.0);
        let b = prism_field(&whole, &p);
        assert_relative_eq!(
            b,
            prism_field(&upper, &p) + prism_field(&lower, &p),
            max_relative = 1e-9
        );
        assert_relative_eq!(
            b,
            prism_field(&left, &p) + prism_field(&right, &p),
            max_relative = 1e-9
        );
    }

    #[test]
    fn wide_slab_field_cancels_above_centre() {
        // each horizontal face alone contributes about 2*pi
        let prism = square(1.0e6, 100.0, 110.0, Vector3::new(0.0, 0.0, 1.0));
        let b = prism_field(&prism, &Vector3::new(0.0, 0.0, 0.0));
        assert!(b.norm() < 1e-3);
    }
}
