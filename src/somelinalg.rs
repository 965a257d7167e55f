//! some linear algebra functions used throughout the code
#![allow(non_snake_case)]
/// symmetric matrices stored by diagonals
pub mod banded;
/// diagnostics for linear systems and matrices: if it is singular
/// or poorly conditioned
pub mod linear_sys_diagnostics;
