//! Image dependent pair potential
//! (S. Smidstrup et al., J. Chem. Phys. 140, 214106, 2014).
//!
//! Each image is pulled toward pair distances linearly interpolated between
//! the endpoints. The objective never calls the real evaluator.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::core::chain::Chain;
use crate::core::domain::{AtomicStructure, EvaluationResult};
use crate::core::spatial::{distance_matrix, separation};
use crate::error::{NebError, Result};
use crate::solvers::relax::ForceOracle;

/// Synthetic objective for a chain of `n` images.
pub struct IdppObjective {
    natoms: usize,
    /// Target distance matrix per image (row-major).
    targets: Vec<Vec<f64>>,
}

impl IdppObjective {
    pub fn new(reactant: &AtomicStructure, product: &AtomicStructure, nimages: usize) -> Result<Self> {
        if !reactant.same_species(product) {
            return Err(NebError::Configuration(
                "IDPP endpoints differ in atom count or species order".into(),
            ));
        }
        if nimages < 2 {
            return Err(NebError::Configuration(format!(
                "IDPP needs at least 2 images, got {}",
                nimages
            )));
        }

        let d_r = distance_matrix(reactant);
        let d_p = distance_matrix(product);
        let targets = (0..nimages)
            .map(|i| {
                let t = i as f64 / (nimages - 1) as f64;
                d_r.iter().zip(&d_p).map(|(r, p)| r + t * (p - r)).collect()
            })
            .collect();

        Ok(Self {
            natoms: reactant.natoms(),
            targets,
        })
    }

    /// Objective value and its forces for image `i`.
    pub fn evaluate_image(&self, i: usize, structure: &AtomicStructure) -> EvaluationResult {
        let n = self.natoms;
        let target = &self.targets[i];
        let lattice = structure.lattice.as_ref();

        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); n];
        for a in 0..n {
            for b in (a + 1)..n {
                let sep = separation(
                    &structure.atoms[a].position,
                    &structure.atoms[b].position,
                    lattice,
                );
                let d = sep.norm();
                if d <= 0.0 {
                    continue;
                }
                let diff = d - target[a * n + b];
                let d4 = d.powi(4);
                energy += diff * diff / d4;

                // dE/dd, then project onto the pair axis
                let de = 2.0 * diff / d4 - 4.0 * diff * diff / (d4 * d);
                let g = sep * (de / d);
                forces[a] += g;
                forces[b] -= g;
            }
        }

        EvaluationResult {
            energy,
            forces,
            dipole: None,
            stress: None,
            revision: structure.revision(),
        }
    }
}

impl ForceOracle for IdppObjective {
    fn refresh_chain(&mut self, chain: &mut Chain) -> Result<()> {
        if chain.len() != self.targets.len() {
            return Err(NebError::Configuration(format!(
                "IDPP objective built for {} images, chain has {}",
                self.targets.len(),
                chain.len()
            )));
        }
        let stale = chain.stale_indices(0..chain.len());
        let results: Vec<EvaluationResult> = {
            let view = &*chain;
            stale
                .par_iter()
                .map(|&i| self.evaluate_image(i, &view.image(i).structure))
                .collect()
        };
        for (&i, r) in stale.iter().zip(results) {
            chain.image_mut(i).store(r);
        }
        Ok(())
    }
}
