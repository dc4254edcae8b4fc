use log::{debug, info};

use crate::core::chain::Chain;
use crate::core::domain::{AtomicStructure, EvaluationResult};
use crate::engine::evaluator::{Evaluator, ModelProperties};
use crate::error::{NebError, Result};

/// How stale images are submitted to the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One evaluator call per structure.
    Single,
    /// One evaluator call for all stale structures.
    Batched,
}

/// Mediates every energy/force request of a run.
///
/// The broker owns the evaluator chosen at startup and counts how often it
/// was invoked; per-image counts live on the chain images themselves.
pub struct ForceBroker {
    evaluator: Box<dyn Evaluator>,
    mode: BatchMode,
    calls: usize,
}

impl ForceBroker {
    pub fn new(evaluator: Box<dyn Evaluator>, mode: BatchMode) -> Self {
        Self {
            evaluator,
            mode,
            calls: 0,
        }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub fn evaluator_name(&self) -> &str {
        self.evaluator.name()
    }

    /// Number of underlying evaluator invocations so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Evaluates `structures` in order, one result per input.
    pub fn evaluate(&mut self, structures: &[AtomicStructure]) -> Result<Vec<EvaluationResult>> {
        if structures.is_empty() {
            return Ok(Vec::new());
        }

        let raw = match self.mode {
            BatchMode::Single => {
                let mut all = Vec::with_capacity(structures.len());
                for s in structures {
                    all.push(self.evaluator.evaluate(s)?);
                    self.calls += 1;
                }
                all
            }
            BatchMode::Batched => {
                let all = self.evaluator.evaluate_many(structures)?;
                self.calls += 1;
                if all.len() != structures.len() {
                    return Err(NebError::Protocol(format!(
                        "submitted {} structures, evaluator returned {} results",
                        structures.len(),
                        all.len()
                    )));
                }
                all
            }
        };

        structures
            .iter()
            .zip(raw)
            .map(|(s, mp)| to_result(s, mp))
            .collect()
    }

    /// Evaluates those of `indices` whose cached result is stale and stores
    /// the new results on the chain. Returns how many images were computed.
    pub fn refresh(
        &mut self,
        chain: &mut Chain,
        indices: impl IntoIterator<Item = usize>,
    ) -> Result<usize> {
        let stale = chain.stale_indices(indices);
        if stale.is_empty() {
            return Ok(0);
        }
        debug!("evaluating images {:?}", stale);

        let structures: Vec<AtomicStructure> = stale
            .iter()
            .map(|&i| chain.image(i).structure.clone())
            .collect();
        let results = self.evaluate(&structures)?;
        for (&i, r) in stale.iter().zip(results) {
            chain.image_mut(i).store(r);
        }
        Ok(stale.len())
    }

    /// Evaluates every image of the chain, e.g. right after building it.
    pub fn evaluate_chain(&mut self, chain: &mut Chain) -> Result<()> {
        let all = 0..chain.len();
        let n = self.refresh(chain, all)?;
        info!(
            "evaluated {} images with {} ({} calls so far)",
            n,
            self.evaluator.name(),
            self.calls
        );
        Ok(())
    }
}

/// Converts raw backend output into a result tagged with the structure's
/// current revision.
fn to_result(structure: &AtomicStructure, mp: ModelProperties) -> Result<EvaluationResult> {
    let forces = mp.forces.ok_or_else(|| {
        NebError::Evaluation(format!("no forces reported for '{}'", structure.title))
    })?;
    if forces.len() != structure.natoms() {
        return Err(NebError::Protocol(format!(
            "expected {} force vectors for '{}', got {}",
            structure.natoms(),
            structure.title,
            forces.len()
        )));
    }

    Ok(EvaluationResult {
        energy: mp.energy.unwrap_or(f64::NAN),
        forces,
        dipole: mp.dipole,
        stress: mp.stress,
        revision: structure.revision(),
    })
}
