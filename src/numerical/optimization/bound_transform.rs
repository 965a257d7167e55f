//! Box constraints through a logistic reparametrization.
//!
//! `mt = -ln((mmax - m) / (m - mmin + EPS))` maps the open box onto the real line
//! and `m = mmin + (mmax - mmin) / (1 + exp(-mt))` maps it back.
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use crate::numerical::optimization::param_codec::PrismLayout;
use log::warn;
use nalgebra::DVector;

/// guards the division at the lower bound
pub const EPS: f64 = 1e-2;
/// exp(-mt) overflows for mt below this value
const UNDERFLOW_LIMIT: f64 = -709.8;
const CLAMPED_VALUE: f64 = -709.7;
/// distance the inverse keeps from a bound it lands on exactly
const BOUND_NUDGE: f64 = 0.1;
/// additive guard of the curvature scaling
const SCALING_GUARD: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub mmin: DVector<f64>,
    pub mmax: DVector<f64>,
}

impl Bounds {
    pub fn new(mmin: DVector<f64>, mmax: DVector<f64>) -> Result<Self, InversionError> {
        ensure(
            mmin.len() == mmax.len(),
            format!(
                "lower and upper bounds differ in length ({} vs {})",
                mmin.len(),
                mmax.len()
            ),
        )?;
        for i in 0..mmin.len() {
            ensure(
                mmin[i] < mmax[i],
                format!(
                    "lower bound {} is not below upper bound {} at index {}",
                    mmin[i], mmax[i], i
                ),
            )?;
        }
        Ok(Bounds { mmin, mmax })
    }

    /// bounds for the stacked-prism layout: every radius in `[rmin, rmax]`, origins in
    /// `[x0min, x0max] x [y0min, y0max]` and the thickness in `[dzmin, dzmax]`
    #[allow(clippy::too_many_arguments)]
    pub fn from_ranges(
        layout: &PrismLayout,
        rmin: f64,
        rmax: f64,
        x0min: f64,
        x0max: f64,
        y0min: f64,
        y0max: f64,
        dzmin: f64,
        dzmax: f64,
    ) -> Result<Self, InversionError> {
        ensure(
            rmin >= 0.0 && rmax >= 0.0 && dzmin >= 0.0 && dzmax >= 0.0,
            "radius and thickness bounds must be non-negative",
        )?;
        let n = layout.n_params();
        let mut mmin = DVector::zeros(n);
        let mut mmax = DVector::zeros(n);
        for i in 0..layout.prisms {
            for k in 0..layout.vertices {
                mmin[layout.radius_index(i, k)] = rmin;
                mmax[layout.radius_index(i, k)] = rmax;
            }
            mmin[layout.x0_index(i)] = x0min;
            mmax[layout.x0_index(i)] = x0max;
            mmin[layout.y0_index(i)] = y0min;
            mmax[layout.y0_index(i)] = y0max;
        }
        mmin[layout.dz_index()] = dzmin;
        mmax[layout.dz_index()] = dzmax;
        Bounds::new(mmin, mmax)
    }

    pub fn len(&self) -> usize {
        self.mmin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmin.is_empty()
    }

    /// true if every entry lies in the closed box
    pub fn contains(&self, m: &DVector<f64>) -> bool {
        m.len() == self.len()
            && m
                .iter()
                .zip(self.mmin.iter().zip(self.mmax.iter()))
                .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi)
    }

    /// m -> mt; finite at both exact bounds
    pub fn forward(&self, m: &DVector<f64>) -> Result<DVector<f64>, InversionError> {
        ensure(
            self.contains(m),
            "model parameters must lie inside the bound box",
        )?;
        Ok(DVector::from_fn(m.len(), |i, _| {
            let numerator = (self.mmax[i] - m[i]).max(f64::MIN_POSITIVE);
            -(numerator / (m[i] - self.mmin[i] + EPS)).ln()
        }))
    }

    /// mt -> m
    pub fn inverse(&self, mt: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(mt.len(), |i, _| {
            let (lo, hi) = (self.mmin[i], self.mmax[i]);
            let mut t = mt[i];
            if t <= UNDERFLOW_LIMIT {
                warn!("transformed parameter {} = {:e} clamped to avoid overflow", i, t);
                t = CLAMPED_VALUE;
            }
            let m = lo + (hi - lo) / (1.0 + (-t).exp());
            // narrow boxes land on their midpoint
            let nudge = BOUND_NUDGE.min(0.5 * (hi - lo));
            if m >= hi {
                hi - nudge
            } else if m <= lo {
                lo + nudge
            } else {
                m
            }
        })
    }

    /// column scaling `(mmax - m)(m - mmin) / (mmax - mmin)` applied to the Hessian,
    /// which shrinks the curvature of parameters close to a bound
    pub fn curvature_scaling(&self, m: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(m.len(), |i, _| {
            (self.mmax[i] - m[i] + SCALING_GUARD) * (m[i] - self.mmin[i] + SCALING_GUARD)
                / (self.mmax[i] - self.mmin[i])
        })
    }
}
