//! Seven weighted quadratic penalties on the stacked-prism parameters.
//!
//! | term  | penalizes                                        |
//! |-------|--------------------------------------------------|
//! | phi_1 | adjacent radii of one prism (cyclic)             |
//! | phi_2 | same-index radii of vertically adjacent prisms   |
//! | phi_3 | shallowest prism vs. the outcropping body        |
//! | phi_4 | shallowest prism origin vs. the outcrop origin   |
//! | phi_5 | origins of vertically adjacent prisms            |
//! | phi_6 | radii (minimum norm)                             |
//! | phi_7 | thickness (minimum norm)                         |
//!
//! Smoothness and minimum-norm terms are banded matrices `B` stored by diagonals,
//! already multiplied by 2, so that the term value is `w/2 m'Bm`, its gradient `w B m`
//! and its Hessian `w B`. The outcrop terms are `w |m[slice] - target|^2`.
use crate::numerical::optimization::inversion_errors::{InversionError, ensure};
use crate::numerical::optimization::param_codec::PrismLayout;
use crate::somelinalg::banded::SymmetricBanded;
use log::info;
use nalgebra::{DMatrix, DVector};

pub const N_TERMS: usize = 7;

/// One penalty term evaluated at unit weight and scaled by the caller's weight
pub trait PenaltyTerm: Send + Sync {
    fn name(&self) -> &str;
    fn value(&self, m: &DVector<f64>, weight: f64) -> f64;
    fn add_gradient(&self, g: &mut DVector<f64>, m: &DVector<f64>, weight: f64);
    fn add_hessian(&self, h: &mut DMatrix<f64>, weight: f64);
    /// trace of the Hessian at unit weight
    fn hessian_trace(&self) -> f64;
}

/// Quadratic form with a banded matrix
pub struct BandedPenalty {
    name: String,
    band: SymmetricBanded,
}

impl BandedPenalty {
    pub fn new(name: &str, band: SymmetricBanded) -> Self {
        BandedPenalty {
            name: name.to_string(),
            band,
        }
    }

    pub fn band(&self) -> &SymmetricBanded {
        &self.band
    }
}

impl PenaltyTerm for BandedPenalty {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, m: &DVector<f64>, weight: f64) -> f64 {
        if weight == 0.0 {
            return 0.0;
        }
        0.5 * weight * self.band.quadratic_form(m)
    }

    fn add_gradient(&self, g: &mut DVector<f64>, m: &DVector<f64>, weight: f64) {
        if weight == 0.0 {
            return;
        }
        g.axpy(weight, &self.band.mul_vec(m), 1.0);
    }

    fn add_hessian(&self, h: &mut DMatrix<f64>, weight: f64) {
        self.band.add_scaled_to(h, weight);
    }

    fn hessian_trace(&self) -> f64 {
        self.band.trace()
    }
}

/// Distance of a contiguous slice of the parameters to a known target
pub struct OutcropPenalty {
    name: String,
    start: usize,
    target: DVector<f64>,
}

impl OutcropPenalty {
    pub fn new(name: &str, start: usize, target: DVector<f64>) -> Self {
        OutcropPenalty {
            name: name.to_string(),
            start,
            target,
        }
    }

    fn misfit(&self, m: &DVector<f64>) -> DVector<f64> {
        m.rows(self.start, self.target.len()) - &self.target
    }
}

impl PenaltyTerm for OutcropPenalty {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, m: &DVector<f64>, weight: f64) -> f64 {
        if weight == 0.0 {
            return 0.0;
        }
        weight * self.misfit(m).norm_squared()
    }

    fn add_gradient(&self, g: &mut DVector<f64>, m: &DVector<f64>, weight: f64) {
        if weight == 0.0 {
            return;
        }
        let d = self.misfit(m);
        for (k, v) in d.iter().enumerate() {
            g[self.start + k] += 2.0 * weight * v;
        }
    }

    fn add_hessian(&self, h: &mut DMatrix<f64>, weight: f64) {
        if weight == 0.0 {
            return;
        }
        for k in 0..self.target.len() {
            let i = self.start + k;
            h[(i, i)] += 2.0 * weight;
        }
    }

    fn hessian_trace(&self) -> f64 {
        2.0 * self.target.len() as f64
    }
}

/// smoothness between adjacent radii of the same prism, closing the ring r_{M-1} - r_0
pub fn diags_phi_1(layout: &PrismLayout) -> SymmetricBanded {
    let n = layout.n_params();
    let (mv, block) = (layout.vertices, layout.block());
    let d0 = DVector::from_fn(n, |i, _| if layout.is_radius(i) { 4.0 } else { 0.0 });
    let d1 = DVector::from_fn(n - 1, |i, _| {
        if i % block < mv - 1 && i < layout.dz_index() {
            -2.0
        } else {
            0.0
        }
    });
    let wrap = DVector::from_fn(n - (mv - 1), |i, _| {
        if i % block == 0 && i <= (layout.prisms - 1) * block {
            -2.0
        } else {
            0.0
        }
    });
    SymmetricBanded::new(n)
        .with_band(0, d0)
        .with_band(1, d1)
        .with_band(mv - 1, wrap)
}

/// smoothness between vertically adjacent prisms over the slots selected by `slot`
fn vertical_smoothness(layout: &PrismLayout, slot: impl Fn(usize) -> bool) -> SymmetricBanded {
    let n = layout.n_params();
    let (block, l) = (layout.block(), layout.prisms);
    let d0 = DVector::from_fn(n, |i, _| {
        if !slot(i) {
            return 0.0;
        }
        let prism = i / block;
        let neighbours = usize::from(prism > 0) + usize::from(prism + 1 < l);
        2.0 * neighbours as f64
    });
    let coupling = DVector::from_fn(n - block, |i, _| {
        if slot(i) && i < (l - 1) * block {
            -2.0
        } else {
            0.0
        }
    });
    SymmetricBanded::new(n)
        .with_band(0, d0)
        .with_band(block, coupling)
}

/// smoothness between same-index radii of vertically adjacent prisms
pub fn diags_phi_2(layout: &PrismLayout) -> SymmetricBanded {
    vertical_smoothness(layout, |i| layout.is_radius(i))
}

/// smoothness between origins of vertically adjacent prisms
pub fn diags_phi_5(layout: &PrismLayout) -> SymmetricBanded {
    vertical_smoothness(layout, |i| layout.is_origin(i))
}

/// minimum norm of the radii
pub fn diags_phi_6(layout: &PrismLayout) -> SymmetricBanded {
    let n = layout.n_params();
    SymmetricBanded::new(n).with_band(
        0,
        DVector::from_fn(n, |i, _| if layout.is_radius(i) { 2.0 } else { 0.0 }),
    )
}

/// minimum norm of the thickness
pub fn diags_phi_7(layout: &PrismLayout) -> SymmetricBanded {
    let n = layout.n_params();
    let mut d0 = DVector::zeros(n);
    d0[layout.dz_index()] = 2.0;
    SymmetricBanded::new(n).with_band(0, d0)
}

/// Non-negative weights `alpha_1..alpha_7`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegularizationWeights {
    pub alpha: [f64; N_TERMS],
}

impl RegularizationWeights {
    pub fn new(alpha: [f64; N_TERMS]) -> Result<Self, InversionError> {
        for (k, a) in alpha.iter().enumerate() {
            ensure(
                *a >= 0.0 && a.is_finite(),
                format!("regularization weight alpha_{} must be non-negative, got {}", k + 1, a),
            )?;
        }
        Ok(RegularizationWeights { alpha })
    }

    pub fn zeros() -> Self {
        RegularizationWeights {
            alpha: [0.0; N_TERMS],
        }
    }

    /// `alpha_k * th / trace_k`; a term with zero trace is switched off
    pub fn normalized_by_trace(&self, th: f64, traces: &[f64; N_TERMS]) -> Self {
        let mut alpha = [0.0; N_TERMS];
        for k in 0..N_TERMS {
            alpha[k] = if traces[k] > 0.0 {
                self.alpha[k] * th / traces[k]
            } else {
                0.0
            };
        }
        RegularizationWeights { alpha }
    }
}

/// The seven terms in order phi_1 .. phi_7
pub struct RegularizationStack {
    terms: Vec<Box<dyn PenaltyTerm>>,
}

impl RegularizationStack {
    /// `outcrop` holds the `M` radii and the origin of the outcropping cross-section
    pub fn new(layout: &PrismLayout, outcrop: &DVector<f64>) -> Result<Self, InversionError> {
        ensure(
            outcrop.len() == layout.block(),
            format!(
                "outcrop vector has length {}, expected M + 2 = {}",
                outcrop.len(),
                layout.block()
            ),
        )?;
        ensure(
            outcrop.iter().all(|v| v.is_finite()),
            "outcrop vector must be finite",
        )?;
        let mv = layout.vertices;
        let terms: Vec<Box<dyn PenaltyTerm>> = vec![
            Box::new(BandedPenalty::new("phi_1", diags_phi_1(layout))),
            Box::new(BandedPenalty::new("phi_2", diags_phi_2(layout))),
            Box::new(OutcropPenalty::new("phi_3", 0, outcrop.clone())),
            Box::new(OutcropPenalty::new("phi_4", mv, outcrop.rows(mv, 2).into_owned())),
            Box::new(BandedPenalty::new("phi_5", diags_phi_5(layout))),
            Box::new(BandedPenalty::new("phi_6", diags_phi_6(layout))),
            Box::new(BandedPenalty::new("phi_7", diags_phi_7(layout))),
        ];
        Ok(RegularizationStack { terms })
    }

    pub fn terms(&self) -> &[Box<dyn PenaltyTerm>] {
        &self.terms
    }

    pub fn traces(&self) -> [f64; N_TERMS] {
        let mut traces = [0.0; N_TERMS];
        for (k, term) in self.terms.iter().enumerate() {
            traces[k] = term.hessian_trace();
        }
        traces
    }

    /// rescales the weights so every term has the Hessian trace `th` times its alpha
    pub fn normalize(&self, weights: &RegularizationWeights, th: f64) -> RegularizationWeights {
        let scaled = weights.normalized_by_trace(th, &self.traces());
        info!("regularization weights normalized by trace {:e}: {:?}", th, scaled.alpha);
        scaled
    }

    pub fn values(&self, m: &DVector<f64>, weights: &RegularizationWeights) -> [f64; N_TERMS] {
        let mut values = [0.0; N_TERMS];
        for (k, term) in self.terms.iter().enumerate() {
            values[k] = term.value(m, weights.alpha[k]);
        }
        values
    }

    pub fn value(&self, m: &DVector<f64>, weights: &RegularizationWeights) -> f64 {
        self.values(m, weights).iter().sum()
    }

    pub fn add_gradient(&self, g: &mut DVector<f64>, m: &DVector<f64>, weights: &RegularizationWeights) {
        for (k, term) in self.terms.iter().enumerate() {
            term.add_gradient(g, m, weights.alpha[k]);
        }
    }

    pub fn add_hessian(&self, h: &mut DMatrix<f64>, weights: &RegularizationWeights) {
        for (k, term) in self.terms.iter().enumerate() {
            term.add_hessian(h, weights.alpha[k]);
        }
    }
}
