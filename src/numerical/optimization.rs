/// errors reported by the inversion
pub mod inversion_errors;
/// layout of the parameter vector and conversion to prisms
pub mod param_codec;
/// change of variables that keeps the parameters inside their bounds
pub mod bound_transform;
/// misfit norms and residual weights
pub mod loss;
/// forward model evaluated on parameter vectors
pub mod forward_adapter;
/// finite-difference sensitivity matrix of the total-field anomaly
pub mod sensitivity;
/// smoothness, outcrop and thickness constraints
pub mod regularization;
#[allow(non_snake_case)]
/// bounded Levenberg-Marquardt inversion of total-field anomaly data
pub mod LM_polyprism;
#[allow(non_snake_case)]
#[cfg(test)]
mod LM_polyprism_tests;
/// inversions repeated over sets of fixed parameters
pub mod inversion_grid;
