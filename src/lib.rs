//! Staged nudged-elastic-band transition-state search.

pub mod analysis;
pub mod core;
pub mod engine;
pub mod error;
pub mod interface;
pub mod io;
pub mod solvers;
