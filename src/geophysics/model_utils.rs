//! Helpers around the inversion: initial guesses, bound boxes and the sets of
//! fixed parameters used to study how the solution depends on them.
use crate::geophysics::polyprism::{PolygonalPrism, ang2vec};
use crate::numerical::optimization::bound_transform::Bounds;
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use crate::numerical::optimization::param_codec::{PrismLayout, decode};
use nalgebra::{DVector, Vector3};

/// Vertical cylinder of radius `r` centred on `(x0, y0)`: every prism has `M` equal radii.
/// Returns the prisms and the parameter vector.
pub fn initial_cylinder(
    layout: &PrismLayout,
    x0: f64,
    y0: f64,
    z0: f64,
    dz: f64,
    r: f64,
    magnetization: &Vector3<f64>,
) -> Result<(Vec<PolygonalPrism>, DVector<f64>), InversionError> {
    ensure(
        r > 0.0 && dz > 0.0,
        format!("radius and thickness must be positive, got r = {}, dz = {}", r, dz),
    )?;
    let mut m0 = DVector::zeros(layout.n_params());
    for i in 0..layout.prisms {
        for k in 0..layout.vertices {
            m0[layout.radius_index(i, k)] = r;
        }
        m0[layout.x0_index(i)] = x0;
        m0[layout.y0_index(i)] = y0;
    }
    m0[layout.dz_index()] = dz;
    let model = decode(&m0, layout, z0, magnetization)?;
    Ok((model, m0))
}

/// Bound box for the stacked-prism layout
#[allow(clippy::too_many_arguments)]
pub fn build_range_param(
    layout: &PrismLayout,
    rmin: f64,
    rmax: f64,
    x0min: f64,
    x0max: f64,
    y0min: f64,
    y0max: f64,
    dzmin: f64,
    dzmax: f64,
) -> Result<Bounds, InversionError> {
    Bounds::from_ranges(layout, rmin, rmax, x0min, x0max, y0min, y0max, dzmin, dzmax)
}

/// Depth of the top and magnetization of one inversion in a sensitivity study
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedParameters {
    pub z0: f64,
    pub magnetization: Vector3<f64>,
}

/// The 19 combinations of perturbed fixed parameters: the reference, single
/// perturbations of depth, intensity and direction, depth perturbed together with
/// intensity or direction, and intensity perturbed together with direction.
/// Inclination and declination always move together.
#[allow(clippy::too_many_arguments)]
pub fn varying_param(
    z0: f64,
    varz: f64,
    intensity: f64,
    varint: f64,
    inc: f64,
    varinc: f64,
    dec: f64,
    vardec: f64,
) -> Vec<FixedParameters> {
    let entry = |z: f64, int: f64, sign_dir: f64| FixedParameters {
        z0: z,
        magnetization: ang2vec(int, inc + sign_dir * varinc, dec + sign_dir * vardec),
    };
    let mut list = vec![
        entry(z0, intensity, 0.0),
        entry(z0 + varz, intensity, 0.0),
        entry(z0 - varz, intensity, 0.0),
    ];
    for z in [z0, z0 + varz, z0 - varz] {
        list.push(entry(z, intensity + varint, 0.0));
        list.push(entry(z, intensity - varint, 0.0));
        list.push(entry(z, intensity, 1.0));
        list.push(entry(z, intensity, -1.0));
    }
    for int in [intensity + varint, intensity - varint] {
        list.push(entry(z0, int, 1.0));
        list.push(entry(z0, int, -1.0));
    }
    list
}
