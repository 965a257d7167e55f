//! examples of usage of RustedPolyprism
/// inversion of synthetic total-field anomalies
pub mod inversion_examples;
