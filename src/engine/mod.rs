pub mod broker;
pub mod evaluator;
pub mod external;
pub mod idpp;
pub mod interpolation;
pub mod lj;
pub mod minimizer;
pub mod neb;
pub mod protocol;
