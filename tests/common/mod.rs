#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use smartneb::core::domain::{Atom, AtomicStructure};
use smartneb::engine::evaluator::{Evaluator, ModelProperties};
use smartneb::error::{NebError, Result};

/// One atom at (x, 0, 0) plus a spectator atom far away on the z axis.
pub fn bead(x: f64) -> AtomicStructure {
    AtomicStructure::from_atoms(
        "bead",
        vec![
            Atom::new("X", Point3::new(x, 0.0, 0.0)),
            Atom::new("Y", Point3::new(0.0, 0.0, 10.0)),
        ],
    )
}

/// Images at x = 0, 1, ..., n-1.
pub fn bead_chain(n: usize) -> Vec<AtomicStructure> {
    (0..n).map(|i| bead(i as f64)).collect()
}

/// Energy bump along x for the first atom:
/// E(x) = s² + 2 s⁴ with s = sin(πx/4), so E(0..=4) = [0, 1, 3, 1, 0].
pub struct BumpEvaluator;

impl BumpEvaluator {
    pub fn energy_at(x: f64) -> f64 {
        let s = (std::f64::consts::PI * x / 4.0).sin();
        s * s + 2.0 * s.powi(4)
    }
}

impl Evaluator for BumpEvaluator {
    fn evaluate(&self, structure: &AtomicStructure) -> Result<ModelProperties> {
        let x = structure.atoms[0].position.x;
        let k = std::f64::consts::PI / 4.0;
        let s = (k * x).sin();
        let c = (k * x).cos();
        // dE/dx = (2s + 8s³) * c * k
        let de = (2.0 * s + 8.0 * s.powi(3)) * c * k;

        let mut forces = vec![Vector3::zeros(); structure.natoms()];
        forces[0] = Vector3::new(-de, 0.0, 0.0);
        Ok(ModelProperties {
            energy: Some(Self::energy_at(x)),
            forces: Some(forces),
            ..Default::default()
        })
    }

    fn name(&self) -> &str {
        "Bump Evaluator"
    }
}

/// Zero forces and a fixed energy; counts invocations.
///
/// `short_batches` makes `evaluate_many` drop the last result, which a
/// batched broker must reject.
pub struct CountingEvaluator {
    pub single_calls: Arc<AtomicUsize>,
    pub batch_calls: Arc<AtomicUsize>,
    pub short_batches: bool,
}

impl CountingEvaluator {
    pub fn new() -> Self {
        Self {
            single_calls: Arc::new(AtomicUsize::new(0)),
            batch_calls: Arc::new(AtomicUsize::new(0)),
            short_batches: false,
        }
    }
}

impl Evaluator for CountingEvaluator {
    fn evaluate(&self, structure: &AtomicStructure) -> Result<ModelProperties> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ModelProperties {
            energy: Some(-1.0),
            forces: Some(vec![Vector3::zeros(); structure.natoms()]),
            ..Default::default()
        })
    }

    fn evaluate_many(&self, structures: &[AtomicStructure]) -> Result<Vec<ModelProperties>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut all: Vec<_> = structures
            .iter()
            .map(|s| ModelProperties {
                energy: Some(-1.0),
                forces: Some(vec![Vector3::zeros(); s.natoms()]),
                ..Default::default()
            })
            .collect();
        if self.short_batches {
            all.pop();
        }
        Ok(all)
    }

    fn name(&self) -> &str {
        "Counting Evaluator"
    }
}

/// Always fails.
pub struct FailingEvaluator;

impl Evaluator for FailingEvaluator {
    fn evaluate(&self, _structure: &AtomicStructure) -> Result<ModelProperties> {
        Err(NebError::Evaluation("mock backend crashed".into()))
    }

    fn name(&self) -> &str {
        "Failing Evaluator"
    }
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("smartneb-test-{}-{}", tag, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}
