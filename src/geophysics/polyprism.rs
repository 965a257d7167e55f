//! Vertical polygonal prisms and the polar-to-Cartesian geometry constructor.
//!
//! Coordinate system: x points north, y east and z down. A prism occupies
//! `z1 <= z <= z2` below its polygonal cross-section. Angles are in degrees.
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use nalgebra::{DVector, Vector3};
use std::f64::consts::PI;

/// magnetic constant divided by 4*pi (H/m)
pub const CM: f64 = 1e-7;
/// Tesla to nanoTesla
pub const T2NT: f64 = 1e9;

/// Direction cosines of a vector with inclination `inc` and declination `dec` (degrees)
pub fn dircos(inc: f64, dec: f64) -> Vector3<f64> {
    let (inc, dec) = (inc.to_radians(), dec.to_radians());
    Vector3::new(inc.cos() * dec.cos(), inc.cos() * dec.sin(), inc.sin())
}

/// Magnetization vector from intensity (A/m), inclination and declination (degrees)
pub fn ang2vec(intensity: f64, inc: f64, dec: f64) -> Vector3<f64> {
    dircos(inc, dec) * intensity
}

/// Inclination and declination of the local geomagnetic field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainField {
    pub inc: f64,
    pub dec: f64,
}

impl MainField {
    pub fn new(inc: f64, dec: f64) -> Self {
        MainField { inc, dec }
    }
    pub fn direction(&self) -> Vector3<f64> {
        dircos(self.inc, self.dec)
    }
}

/// Observation coordinates, three equal-length arrays
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPoints {
    pub x: DVector<f64>,
    pub y: DVector<f64>,
    pub z: DVector<f64>,
}

impl ObservationPoints {
    pub fn new(x: DVector<f64>, y: DVector<f64>, z: DVector<f64>) -> Result<Self, InversionError> {
        ensure(
            x.len() == y.len() && y.len() == z.len(),
            format!(
                "the number of points in x, y and z must be equal ({}, {}, {})",
                x.len(),
                y.len(),
                z.len()
            ),
        )?;
        Ok(ObservationPoints { x, y, z })
    }

    /// regular grid of `nx * ny` points at constant height `z`, x varying fastest
    pub fn regular_grid(area: [f64; 4], shape: (usize, usize), z: f64) -> Self {
        let (nx, ny) = shape;
        let [x1, x2, y1, y2] = area;
        let step = |a: f64, b: f64, n: usize| if n > 1 { (b - a) / (n - 1) as f64 } else { 0.0 };
        let (sx, sy) = (step(x1, x2, nx), step(y1, y2, ny));
        let mut xs = Vec::with_capacity(nx * ny);
        let mut ys = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                xs.push(x1 + i as f64 * sx);
                ys.push(y1 + j as f64 * sy);
            }
        }
        let n = xs.len();
        ObservationPoints {
            x: DVector::from_vec(xs),
            y: DVector::from_vec(ys),
            z: DVector::from_element(n, z),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn point(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.x[i], self.y[i], self.z[i])
    }
}

/// Vertical prism with a polygonal cross-section and uniform magnetization (A/m)
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonalPrism {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z1: f64,
    pub z2: f64,
    pub magnetization: Vector3<f64>,
}

impl PolygonalPrism {
    pub fn new(vertices: &[[f64; 2]], z1: f64, z2: f64, magnetization: Vector3<f64>) -> Self {
        PolygonalPrism {
            x: vertices.iter().map(|v| v[0]).collect(),
            y: vertices.iter().map(|v| v[1]).collect(),
            z1,
            z2,
            magnetization,
        }
    }

    pub fn nverts(&self) -> usize {
        self.x.len()
    }

    pub fn vertex(&self, k: usize) -> [f64; 2] {
        [self.x[k], self.y[k]]
    }

    /// signed area of the cross-section, positive for counter-clockwise vertices
    pub fn area(&self) -> f64 {
        area_polygon(&self.x, &self.y)
    }

    pub fn volume(&self) -> f64 {
        self.area() * (self.z2 - self.z1)
    }

    /// the same prism shifted horizontally
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        PolygonalPrism {
            x: self.x.iter().map(|x| x + dx).collect(),
            y: self.y.iter().map(|y| y + dy).collect(),
            ..self.clone()
        }
    }

    /// the same cross-section between new top and bottom
    pub fn with_depths(&self, z1: f64, z2: f64) -> Self {
        PolygonalPrism {
            z1,
            z2,
            ..self.clone()
        }
    }
}

/// Shoelace formula
pub fn area_polygon(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    let mut area = 0.0;
    for i in 0..n {
        let next = (i + 1) % n;
        let prev = (i + n - 1) % n;
        area += x[i] * (y[next] - y[prev]);
    }
    area / 2.0
}

/// Total volume of a stack of prisms
pub fn volume_polygon(model: &[PolygonalPrism]) -> f64 {
    model.iter().map(|p| p.volume()).sum()
}

/// Polar description of one prism: `M` radial distances sampled at angles `2*pi*k/M`
/// around the origin `(x0, y0)`, top `z1`, bottom `z2` and magnetization
#[derive(Debug, Clone, PartialEq)]
pub struct PrismDescriptor {
    pub radii: Vec<f64>,
    pub x0: f64,
    pub y0: f64,
    pub z1: f64,
    pub z2: f64,
    pub magnetization: Vector3<f64>,
}

impl PrismDescriptor {
    /// vertices in Cartesian coordinates
    pub fn vertices(&self) -> Vec<[f64; 2]> {
        let m = self.radii.len();
        let ang = 2.0 * PI / m as f64;
        self.radii
            .iter()
            .enumerate()
            .map(|(k, r)| {
                let theta = k as f64 * ang;
                [r * theta.cos() + self.x0, r * theta.sin() + self.y0]
            })
            .collect()
    }

    pub fn to_prism(&self) -> PolygonalPrism {
        PolygonalPrism::new(&self.vertices(), self.z1, self.z2, self.magnetization)
    }
}

/// Transforms polar descriptions of `L` prisms with `M` vertices each into Cartesian prisms
pub fn pol2cart(
    descriptors: &[PrismDescriptor],
    m: usize,
    l: usize,
) -> Result<Vec<PolygonalPrism>, InversionError> {
    ensure(
        descriptors.len() == l,
        format!("expected {} prisms, got {}", l, descriptors.len()),
    )?;
    for (i, d) in descriptors.iter().enumerate() {
        ensure(
            d.radii.len() == m,
            format!("prism {} has {} radii, all prisms must have {}", i, d.radii.len(), m),
        )?;
    }
    Ok(descriptors.iter().map(|d| d.to_prism()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dircos_is_unit_and_points_down_for_vertical_inclination() {
        let f = dircos(-17.0, -19.0);
        assert_relative_eq!(f.norm(), 1.0, epsilon = 1e-14);
        let down = dircos(90.0, 0.0);
        assert_relative_eq!(down.z, 1.0, epsilon = 1e-14);
        assert_relative_eq!(ang2vec(3.0, 0.0, 90.0).y, 3.0, epsilon = 1e-14);
    }

    #[test]
    fn shoelace_area_of_square() {
        let x = [0.0, 2.0, 2.0, 0.0];
        let y = [0.0, 0.0, 2.0, 2.0];
        assert_relative_eq!(area_polygon(&x, &y), 4.0);
        let xr: Vec<f64> = x.iter().rev().cloned().collect();
        let yr: Vec<f64> = y.iter().rev().cloned().collect();
        assert_relative_eq!(area_polygon(&xr, &yr), -4.0);
    }

    #[test]
    fn pol2cart_places_vertices_on_circle() {
        let d = PrismDescriptor {
            radii: vec![100.0; 4],
            x0: 10.0,
            y0: -5.0,
            z1: 0.0,
            z2: 50.0,
            magnetization: Vector3::new(0.0, 0.0, 1.0),
        };
        let prisms = pol2cart(&[d.clone()], 4, 1).unwrap();
        let p = &prisms[0];
        assert_relative_eq!(p.x[0], 110.0, epsilon = 1e-10);
        assert_relative_eq!(p.y[1], 95.0, epsilon = 1e-10);
        assert_relative_eq!(p.x[2], -90.0, epsilon = 1e-10);
        assert_relative_eq!(p.y[3], -105.0, epsilon = 1e-10);
        // square inscribed in circle of radius 100
        assert_relative_eq!(p.area(), 20000.0, epsilon = 1e-8);
        assert_relative_eq!(volume_polygon(&prisms), 1.0e6, epsilon = 1e-6);
    }

    #[test]
    fn pol2cart_rejects_wrong_vertex_count() {
        let d = PrismDescriptor {
            radii: vec![100.0; 3],
            x0: 0.0,
            y0: 0.0,
            z1: 0.0,
            z2: 50.0,
            magnetization: Vector3::zeros(),
        };
        assert!(pol2cart(&[d.clone()], 4, 1).is_err());
        assert!(pol2cart(&[d], 3, 2).is_err());
    }

    #[test]
    fn observation_points_require_equal_lengths() {
        let x = DVector::from_vec(vec![0.0, 1.0]);
        let z = DVector::from_vec(vec![0.0]);
        assert!(ObservationPoints::new(x.clone(), x.clone(), z).is_err());
        let grid = ObservationPoints::regular_grid([-10.0, 10.0, -20.0, 20.0], (3, 5), -1.0);
        assert_eq!(grid.len(), 15);
        assert_relative_eq!(grid.x[2], 10.0);
        assert_relative_eq!(grid.y[14], 20.0);
    }
}
