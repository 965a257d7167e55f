use crate::numerical::optimization::inversion_errors::InversionError;
use nalgebra::DVector;
use strum_macros::{Display, EnumString};

/// residual weight guard of the absolute loss
pub const L1_GUARD: f64 = 1e-10;

/// Data-misfit norm. The absolute norm is handled by iteratively reweighted least
/// squares: each outer iteration solves a weighted quadratic problem with
/// weights `1/(|r| + 1e-10)` taken from the last accepted residual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum LossNorm {
    #[strum(to_string = "L1", serialize = "1", serialize = "l1", serialize = "absolute")]
    Absolute,
    #[strum(to_string = "L2", serialize = "2", serialize = "l2", serialize = "quadratic")]
    Quadratic,
}

impl LossNorm {
    /// selector `1` or `2`
    pub fn from_order(order: u8) -> Result<Self, InversionError> {
        match order {
            1 => Ok(LossNorm::Absolute),
            2 => Ok(LossNorm::Quadratic),
            _ => Err(InversionError::PreconditionViolation(format!(
                "loss norm must be 1 or 2, got {}",
                order
            ))),
        }
    }

    /// mean |r| or mean r^2
    pub fn misfit(&self, residual: &DVector<f64>) -> f64 {
        let n = residual.len().max(1) as f64;
        match self {
            LossNorm::Absolute => residual.iter().map(|r| r.abs()).sum::<f64>() / n,
            LossNorm::Quadratic => residual.norm_squared() / n,
        }
    }

    /// residual weights of the next weighted least-squares problem
    pub fn weights(&self, residual: &DVector<f64>) -> DVector<f64> {
        match self {
            LossNorm::Absolute => residual.map(|r| 1.0 / (r.abs() + L1_GUARD)),
            LossNorm::Quadratic => DVector::from_element(residual.len(), 1.0),
        }
    }
}
