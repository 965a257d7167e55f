//! Magnetic bodies made of stacked vertical polygonal prisms
/// prisms, observation points, main-field direction and the polar-to-Cartesian constructor
pub mod polyprism;
/// closed-form total-field anomaly of polygonal prisms
pub mod polyprism_tf;
/// initial guesses, bound boxes and sets of fixed parameters
pub mod model_utils;
