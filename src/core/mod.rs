pub mod chain;
pub mod config;
pub mod constraints;
pub mod domain;
pub mod spatial;
