use log::info;
use serde::{Deserialize, Serialize};

use crate::core::domain::{AtomicStructure, EvaluationResult};
use crate::error::{NebError, Result};

/// One link of the chain: a structure plus its cached evaluation.
#[derive(Debug, Clone)]
pub struct Image {
    pub structure: AtomicStructure,
    result: Option<EvaluationResult>,
    /// Number of evaluations stored for this image (diagnostic).
    pub evaluations: usize,
}

impl Image {
    pub fn new(structure: AtomicStructure) -> Self {
        Self {
            structure,
            result: None,
            evaluations: 0,
        }
    }

    /// The cached result, if it still matches the current positions.
    pub fn result(&self) -> Option<&EvaluationResult> {
        self.result
            .as_ref()
            .filter(|r| r.is_current_for(&self.structure))
    }

    /// Like `result`, but treats a missing or stale result as an error.
    pub fn fresh_result(&self) -> Result<&EvaluationResult> {
        match &self.result {
            Some(r) if r.is_current_for(&self.structure) => Ok(r),
            Some(r) => {
                debug_assert!(
                    false,
                    "read stale result (rev {} vs structure rev {})",
                    r.revision,
                    self.structure.revision()
                );
                Err(NebError::Evaluation(format!(
                    "stale result for structure '{}'",
                    self.structure.title
                )))
            }
            None => Err(NebError::Evaluation(format!(
                "structure '{}' has not been evaluated",
                self.structure.title
            ))),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.result().is_none()
    }

    /// NaN when no current result exists.
    pub fn energy(&self) -> f64 {
        self.result().map(|r| r.energy).unwrap_or(f64::NAN)
    }

    pub fn store(&mut self, result: EvaluationResult) {
        debug_assert!(result.is_current_for(&self.structure));
        self.result = Some(result);
        self.evaluations += 1;
    }
}

/// An ordered sequence of images with fixed endpoints.
#[derive(Debug, Clone)]
pub struct Chain {
    images: Vec<Image>,
    /// Atoms that stay fixed in every image regardless of staging.
    pinned_atoms: Vec<usize>,
}

impl Chain {
    /// Builds a chain, checking length and species consistency.
    pub fn new(structures: Vec<AtomicStructure>) -> Result<Self> {
        if structures.len() < 3 {
            return Err(NebError::Configuration(format!(
                "a chain needs at least 3 images, got {}",
                structures.len()
            )));
        }
        let first = &structures[0];
        if first.natoms() == 0 {
            return Err(NebError::Configuration("images contain no atoms".into()));
        }
        for (i, s) in structures.iter().enumerate().skip(1) {
            if s.natoms() != first.natoms() {
                return Err(NebError::Configuration(format!(
                    "image {} has {} atoms, expected {}",
                    i,
                    s.natoms(),
                    first.natoms()
                )));
            }
            if !s.same_species(first) {
                return Err(NebError::Configuration(format!(
                    "image {}: species order differs from image 0",
                    i
                )));
            }
        }

        Ok(Self {
            images: structures.into_iter().map(Image::new).collect(),
            pinned_atoms: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn natoms(&self) -> usize {
        self.images[0].structure.natoms()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn image(&self, i: usize) -> &Image {
        &self.images[i]
    }

    pub fn image_mut(&mut self, i: usize) -> &mut Image {
        &mut self.images[i]
    }

    /// Indices of the movable images, 1..=N-2.
    pub fn interior(&self) -> std::ops::Range<usize> {
        1..self.images.len() - 1
    }

    pub fn is_endpoint(&self, i: usize) -> bool {
        i == 0 || i + 1 == self.images.len()
    }

    /// Per-image energies, NaN for images without a current result.
    pub fn energies(&self) -> Vec<f64> {
        self.images.iter().map(|img| img.energy()).collect()
    }

    pub fn structures(&self) -> Vec<&AtomicStructure> {
        self.images.iter().map(|img| &img.structure).collect()
    }

    pub fn into_structures(self) -> Vec<AtomicStructure> {
        self.images.into_iter().map(|img| img.structure).collect()
    }

    /// Subset of `indices` whose cached result is missing or stale.
    pub fn stale_indices(&self, indices: impl IntoIterator<Item = usize>) -> Vec<usize> {
        indices
            .into_iter()
            .filter(|&i| self.images[i].is_stale())
            .collect()
    }

    pub fn pinned_atoms(&self) -> &[usize] {
        &self.pinned_atoms
    }

    pub(crate) fn set_pinned_atoms(&mut self, atoms: Vec<usize>) {
        self.pinned_atoms = atoms;
    }

    /// Total number of per-image evaluations stored so far.
    pub fn evaluation_counts(&self) -> Vec<usize> {
        self.images.iter().map(|img| img.evaluations).collect()
    }
}

// --- Spring constants ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpringConstants {
    /// One stiffness for every link.
    Uniform(f64),
    /// One stiffness per adjacent pair (N-1 values).
    PerLink(Vec<f64>),
}

impl SpringConstants {
    pub fn uniform() -> Self {
        SpringConstants::Uniform(1.0)
    }

    /// Stiffness of the link between image `i` and `i + 1`.
    pub fn link(&self, i: usize) -> f64 {
        match self {
            SpringConstants::Uniform(k) => *k,
            SpringConstants::PerLink(ks) => ks[i],
        }
    }
}

/// Distance-preserving springs: k_i = 1 / |R_{i+1} - R_i|.
///
/// Images that start far apart are pulled less strongly than close ones,
/// so the relaxed band keeps the initial relative spacing.
pub fn spring_constants(chain: &Chain) -> Result<SpringConstants> {
    let images = chain.images();
    let mut ks = Vec::with_capacity(images.len() - 1);
    info!("k vars:");
    for i in 0..images.len() - 1 {
        let d = images[i].structure.distance_to(&images[i + 1].structure);
        if d <= 0.0 || !d.is_finite() {
            return Err(NebError::Configuration(format!(
                "images {} and {} coincide; cannot derive a spring constant",
                i,
                i + 1
            )));
        }
        let k = 1.0 / d;
        info!("{:02}--{:02} = {:4.2}", i, i + 1, k);
        ks.push(k);
    }
    Ok(SpringConstants::PerLink(ks))
}
