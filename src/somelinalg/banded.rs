//! Symmetric banded matrices stored as a list of (offset, values) diagonals.
//!
//! A band with offset `k` holds the entries `(i, i + k)` and `(i + k, i)` for
//! `i = 0..n-k`, so only the non-zero diagonals are ever touched.
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricBanded {
    n: usize,
    bands: Vec<(usize, DVector<f64>)>,
}

impl SymmetricBanded {
    pub fn new(n: usize) -> Self {
        SymmetricBanded {
            n,
            bands: Vec::new(),
        }
    }

    /// adds a diagonal with the given offset; `values` must have length `n - offset`.
    /// Bands with a repeated offset are summed.
    pub fn with_band(mut self, offset: usize, values: DVector<f64>) -> Self {
        debug_assert!(offset < self.n.max(1));
        debug_assert_eq!(values.len(), self.n - offset);
        if let Some((_, existing)) = self.bands.iter_mut().find(|(k, _)| *k == offset) {
            *existing += values;
        } else {
            self.bands.push((offset, values));
        }
        self
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn bands(&self) -> &[(usize, DVector<f64>)] {
        &self.bands
    }

    /// main diagonal (zeros if no offset-0 band was set)
    pub fn diagonal(&self) -> DVector<f64> {
        self.bands
            .iter()
            .find(|(k, _)| *k == 0)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| DVector::zeros(self.n))
    }

    pub fn trace(&self) -> f64 {
        self.diagonal().sum()
    }

    /// y = B x
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = DVector::zeros(self.n);
        for (k, v) in &self.bands {
            let k = *k;
            if k == 0 {
                y += v.component_mul(x);
                continue;
            }
            for i in 0..v.len() {
                y[i] += v[i] * x[i + k];
                y[i + k] += v[i] * x[i];
            }
        }
        y
    }

    /// x' B x
    pub fn quadratic_form(&self, x: &DVector<f64>) -> f64 {
        x.dot(&self.mul_vec(x))
    }

    /// H += scale * B, touching only the stored diagonals
    pub fn add_scaled_to(&self, h: &mut DMatrix<f64>, scale: f64) {
        if scale == 0.0 {
            return;
        }
        for (k, v) in &self.bands {
            let k = *k;
            for i in 0..v.len() {
                h[(i, i + k)] += scale * v[i];
                if k > 0 {
                    h[(i + k, i)] += scale * v[i];
                }
            }
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(self.n, self.n);
        self.add_scaled_to(&mut a, 1.0);
        a
    }
}
