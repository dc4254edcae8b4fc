use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{NebError, Result};

// --- Physics Types ---

/// A single atom of a structure snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub symbol: String,
    pub position: Point3<f64>,
    /// Frozen atoms never move during a relaxation sub-step.
    pub is_fixed: bool,
}

impl Atom {
    pub fn new(symbol: &str, position: Point3<f64>) -> Self {
        Self {
            symbol: symbol.to_string(),
            position,
            is_fixed: false,
        }
    }
}

/// Defines the Periodic Boundary Conditions (if any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub vectors: Matrix3<f64>, // Columns are a, b, c
    pub inverse: Matrix3<f64>, // Precomputed for fractional conversion
}

impl Lattice {
    pub fn new(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        let vectors = Matrix3::from_columns(&[a, b, c]);
        let inverse = vectors.try_inverse()?;
        Some(Self { vectors, inverse })
    }
}

// --- The Core Entity ---

/// One atomic-structure snapshot.
///
/// Species ordering and the lattice are fixed after construction. Positions
/// and the per-atom constraint mask are mutated in place; every position
/// change bumps `revision`, which is how cached evaluation results detect
/// that they went stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicStructure {
    pub title: String,
    pub atoms: Vec<Atom>,
    pub lattice: Option<Lattice>,
    revision: u64,
}

impl AtomicStructure {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            atoms: Vec::new(),
            lattice: None,
            revision: 0,
        }
    }

    pub fn from_atoms(title: &str, atoms: Vec<Atom>) -> Self {
        Self {
            atoms,
            ..Self::new(title)
        }
    }

    pub fn natoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.atoms.iter().map(|a| a.symbol.as_str()).collect()
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|a| a.position).collect()
    }

    /// Overwrites every position, fixed atoms included.
    pub fn set_positions(&mut self, positions: &[Point3<f64>]) -> Result<()> {
        if positions.len() != self.atoms.len() {
            return Err(NebError::Configuration(format!(
                "expected {} positions, got {}",
                self.atoms.len(),
                positions.len()
            )));
        }
        for (atom, p) in self.atoms.iter_mut().zip(positions) {
            atom.position = *p;
        }
        self.revision += 1;
        Ok(())
    }

    /// Writes positions for free atoms only. Fixed atoms keep their exact
    /// coordinates. Returns whether anything moved.
    pub fn update_free_positions(&mut self, positions: &[Point3<f64>]) -> bool {
        debug_assert_eq!(positions.len(), self.atoms.len());
        let mut moved = false;
        for (atom, p) in self.atoms.iter_mut().zip(positions) {
            if !atom.is_fixed && atom.position != *p {
                atom.position = *p;
                moved = true;
            }
        }
        if moved {
            self.revision += 1;
        }
        moved
    }

    /// An image is frozen iff every one of its atoms is fixed.
    pub fn is_frozen(&self) -> bool {
        !self.atoms.is_empty() && self.atoms.iter().all(|a| a.is_fixed)
    }

    pub fn set_fixed_all(&mut self, fixed: bool) {
        for atom in &mut self.atoms {
            atom.is_fixed = fixed;
        }
    }

    /// True when both structures carry the same species in the same order.
    pub fn same_species(&self, other: &AtomicStructure) -> bool {
        self.natoms() == other.natoms()
            && self
                .atoms
                .iter()
                .zip(&other.atoms)
                .all(|(a, b)| a.symbol == b.symbol)
    }

    /// Euclidean norm of the full positional difference to `other`.
    pub fn distance_to(&self, other: &AtomicStructure) -> f64 {
        debug_assert_eq!(self.natoms(), other.natoms());
        self.atoms
            .iter()
            .zip(&other.atoms)
            .map(|(a, b)| (b.position - a.position).norm_squared())
            .sum::<f64>()
            .sqrt()
    }
}

/// Energy and forces for one structure snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// NaN when the evaluation failed or was skipped.
    pub energy: f64,
    pub forces: Vec<Vector3<f64>>,
    pub dipole: Option<Vector3<f64>>,
    pub stress: Option<Matrix3<f64>>,
    /// Revision of the structure this result was computed against.
    pub revision: u64,
}

impl EvaluationResult {
    pub fn is_current_for(&self, structure: &AtomicStructure) -> bool {
        self.revision == structure.revision()
    }
}
