//! Flat parameter vector of the stacked-prism model.
//!
//! Layout for `L` prisms with `M` vertices each (length `L*(M+2)+1`):
//!
//! ```text
//! [r_0^0 .. r_{M-1}^0, x0^0, y0^0,  r_0^1 .. , x0^1, y0^1,  ...,  dz]
//! ```
//!
//! All prisms share the thickness `dz`; prism `i` spans `[z0 + i*dz, z0 + (i+1)*dz]`.
use crate::geophysics::polyprism::{PolygonalPrism, PrismDescriptor};
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use nalgebra::{DVector, Vector3};

/// Number of vertices per prism (`M`) and number of prisms (`L`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrismLayout {
    pub vertices: usize,
    pub prisms: usize,
}

impl PrismLayout {
    pub fn new(vertices: usize, prisms: usize) -> Result<Self, InversionError> {
        ensure(
            vertices >= 3,
            format!("a prism needs at least 3 vertices, got {}", vertices),
        )?;
        ensure(prisms >= 1, "the model needs at least one prism")?;
        Ok(PrismLayout { vertices, prisms })
    }

    /// parameters of one prism: M radii and the origin
    pub fn block(&self) -> usize {
        self.vertices + 2
    }

    pub fn n_params(&self) -> usize {
        self.prisms * self.block() + 1
    }

    pub fn radius_index(&self, prism: usize, vertex: usize) -> usize {
        prism * self.block() + vertex
    }

    pub fn x0_index(&self, prism: usize) -> usize {
        prism * self.block() + self.vertices
    }

    pub fn y0_index(&self, prism: usize) -> usize {
        prism * self.block() + self.vertices + 1
    }

    pub fn dz_index(&self) -> usize {
        self.prisms * self.block()
    }

    pub fn is_radius(&self, i: usize) -> bool {
        i < self.dz_index() && i % self.block() < self.vertices
    }

    pub fn is_origin(&self, i: usize) -> bool {
        i < self.dz_index() && i % self.block() >= self.vertices
    }
}

/// Packs per-prism descriptions into the parameter vector. The shared thickness is
/// taken from the first prism.
pub fn encode(descriptors: &[PrismDescriptor], layout: &PrismLayout) -> Result<DVector<f64>, InversionError> {
    ensure(
        descriptors.len() == layout.prisms,
        format!(
            "expected {} prisms, got {}",
            layout.prisms,
            descriptors.len()
        ),
    )?;
    let mut m = DVector::zeros(layout.n_params());
    for (i, d) in descriptors.iter().enumerate() {
        ensure(
            d.radii.len() == layout.vertices,
            format!(
                "prism {} has {} radii, expected {}",
                i,
                d.radii.len(),
                layout.vertices
            ),
        )?;
        for (k, r) in d.radii.iter().enumerate() {
            m[layout.radius_index(i, k)] = *r;
        }
        m[layout.x0_index(i)] = d.x0;
        m[layout.y0_index(i)] = d.y0;
    }
    m[layout.dz_index()] = descriptors[0].z2 - descriptors[0].z1;
    Ok(m)
}

/// Unpacks the parameter vector into per-prism descriptions stacked from `z0`
pub fn decode_descriptors(
    m: &DVector<f64>,
    layout: &PrismLayout,
    z0: f64,
    magnetization: &Vector3<f64>,
) -> Result<Vec<PrismDescriptor>, InversionError> {
    ensure(
        m.len() == layout.n_params(),
        format!(
            "parameter vector has length {}, expected {} for M = {}, L = {}",
            m.len(),
            layout.n_params(),
            layout.vertices,
            layout.prisms
        ),
    )?;
    let dz = m[layout.dz_index()];
    Ok((0..layout.prisms)
        .map(|i| {
            let start = layout.radius_index(i, 0);
            PrismDescriptor {
                radii: m.rows(start, layout.vertices).iter().cloned().collect(),
                x0: m[layout.x0_index(i)],
                y0: m[layout.y0_index(i)],
                z1: z0 + i as f64 * dz,
                z2: z0 + (i + 1) as f64 * dz,
                magnetization: *magnetization,
            }
        })
        .collect())
}

/// Unpacks the parameter vector into Cartesian prisms
pub fn decode(
    m: &DVector<f64>,
    layout: &PrismLayout,
    z0: f64,
    magnetization: &Vector3<f64>,
) -> Result<Vec<PolygonalPrism>, InversionError> {
    Ok(decode_descriptors(m, layout, z0, magnetization)?
        .iter()
        .map(|d| d.to_prism())
        .collect())
}
