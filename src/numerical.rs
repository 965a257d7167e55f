/// inversion of potential-field data
pub mod optimization;
