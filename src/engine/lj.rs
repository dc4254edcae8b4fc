use log::warn;
use nalgebra::Vector3;

use crate::core::domain::AtomicStructure;
use crate::engine::evaluator::{Evaluator, ModelProperties};
use crate::error::Result;

/// Built-in Lennard-Jones pair potential, useful for cheap test paths.
#[derive(Clone, Copy, Debug)]
pub struct LennardJones {
    /// Energy constant of the Lennard-Jones potential
    pub epsilon: f64,
    /// Distance constant of the Lennard-Jones potential
    pub sigma: f64,
}

impl Default for LennardJones {
    fn default() -> Self {
        LennardJones {
            epsilon: 1.0,
            sigma: 1.0,
        }
    }
}

impl LennardJones {
    // vij
    fn pair_energy(&self, r: f64) -> f64 {
        let s6 = f64::powi(self.sigma / r, 6);
        4.0 * self.epsilon * (f64::powi(s6, 2) - s6)
    }

    // dvij/dr
    fn pair_gradient(&self, r: f64) -> f64 {
        let s6 = f64::powi(self.sigma / r, 6);
        24.0 * self.epsilon * (s6 - 2.0 * f64::powi(s6, 2)) / r
    }
}

impl Evaluator for LennardJones {
    fn name(&self) -> &str {
        "Lennard-Jones"
    }

    fn evaluate(&self, structure: &AtomicStructure) -> Result<ModelProperties> {
        if structure.lattice.is_some() {
            warn!("LJ model: periodic lattice will be ignored!");
        }

        let natoms = structure.natoms();
        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); natoms];

        for i in 0..natoms {
            for j in 0..i {
                let dr = structure.atoms[j].position - structure.atoms[i].position;
                let r = dr.norm();
                energy += self.pair_energy(r);
                let g = self.pair_gradient(r);
                forces[i] += dr * (g / r);
                forces[j] -= dr * (g / r);
            }
        }

        Ok(ModelProperties {
            energy: Some(energy),
            forces: Some(forces),
            ..Default::default()
        })
    }
}
