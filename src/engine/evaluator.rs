use nalgebra::{Matrix3, Vector3};

use crate::core::config::EvaluatorConfig;
use crate::core::domain::AtomicStructure;
use crate::engine::external::blackbox::BlackBoxEvaluator;
use crate::engine::lj::LennardJones;
use crate::error::Result;

/// Properties reported by a backend for one submitted structure.
///
/// Fields a backend did not report stay `None`.
#[derive(Debug, Clone, Default)]
pub struct ModelProperties {
    /// Structure echoed back by the backend, if any.
    pub structure: Option<AtomicStructure>,
    pub energy: Option<f64>,
    pub forces: Option<Vec<Vector3<f64>>>,
    pub dipole: Option<Vector3<f64>>,
    pub stress: Option<Matrix3<f64>>,
}

/// A generic interface for potential-energy backends.
/// Implementations must be Thread-Safe (Sync).
pub trait Evaluator: Send + Sync {
    /// Computes energy and forces for one structure.
    fn evaluate(&self, structure: &AtomicStructure) -> Result<ModelProperties>;

    /// Computes many structures, ideally in a single backend invocation.
    /// Results must come back in submission order.
    fn evaluate_many(&self, structures: &[AtomicStructure]) -> Result<Vec<ModelProperties>> {
        structures.iter().map(|s| self.evaluate(s)).collect()
    }

    /// Returns the name of the engine (e.g., "Lennard-Jones").
    fn name(&self) -> &str;
}

/// Resolves the configured backend into an evaluator strategy.
pub fn build_evaluator(config: &EvaluatorConfig) -> Box<dyn Evaluator> {
    match config {
        EvaluatorConfig::LennardJones { epsilon, sigma } => Box::new(LennardJones {
            epsilon: *epsilon,
            sigma: *sigma,
        }),
        EvaluatorConfig::External {
            command,
            scratch_root,
        } => Box::new(BlackBoxEvaluator::new(command, scratch_root.clone())),
    }
}
