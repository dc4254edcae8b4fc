//! One relaxation sub-step of a band: bind chain, force source, NEB
//! projection and minimizer together.

use log::debug;
use nalgebra::{Point3, Vector3};

use crate::core::chain::{Chain, SpringConstants};
use crate::engine::broker::ForceBroker;
use crate::engine::minimizer::{MinimizeReport, Minimizer, StopCriteria};
use crate::engine::neb;
use crate::error::Result;

/// Anything that can bring the cached energies/forces of a chain up to date.
pub trait ForceOracle {
    fn refresh_chain(&mut self, chain: &mut Chain) -> Result<()>;
}

impl ForceOracle for ForceBroker {
    fn refresh_chain(&mut self, chain: &mut Chain) -> Result<()> {
        let n = chain.len();
        self.refresh(chain, 0..n)?;
        Ok(())
    }
}

/// Relaxes every interior image that is not fully frozen.
///
/// Only free atoms are ever written back, so frozen images and fixed atoms
/// keep bit-identical coordinates.
pub fn relax_band(
    chain: &mut Chain,
    oracle: &mut dyn ForceOracle,
    minimizer: &mut dyn Minimizer,
    springs: &SpringConstants,
    climbing: Option<usize>,
    criteria: StopCriteria,
) -> Result<MinimizeReport> {
    let active: Vec<usize> = chain
        .interior()
        .filter(|&i| !chain.image(i).structure.is_frozen())
        .collect();
    let natoms = chain.natoms();

    if active.is_empty() {
        return Ok(MinimizeReport {
            converged: true,
            steps: 0,
            fmax: 0.0,
            force_calls: 0,
        });
    }
    debug!("relaxing images {:?} (climbing: {:?})", active, climbing);

    let mut x: Vec<Vector3<f64>> = active
        .iter()
        .flat_map(|&i| chain.image(i).structure.atoms.iter().map(|a| a.position.coords))
        .collect();

    let mut force_fn = |coords: &[Vector3<f64>]| -> Result<Vec<Vector3<f64>>> {
        for (k, &i) in active.iter().enumerate() {
            let block: Vec<Point3<f64>> = coords[k * natoms..(k + 1) * natoms]
                .iter()
                .map(|&c| Point3::from(c))
                .collect();
            chain.image_mut(i).structure.update_free_positions(&block);
        }
        oracle.refresh_chain(chain)?;
        let forces = neb::effective_forces(chain, springs, climbing)?;
        Ok(active
            .iter()
            .flat_map(|&i| forces[i].iter().copied())
            .collect())
    };

    minimizer.minimize(&mut x, &mut force_fn, criteria)
}

/// Max per-atom NEB force over the whole chain at its current positions.
pub fn band_fmax(
    chain: &mut Chain,
    oracle: &mut dyn ForceOracle,
    springs: &SpringConstants,
    climbing: Option<usize>,
) -> Result<f64> {
    oracle.refresh_chain(chain)?;
    let forces = neb::effective_forces(chain, springs, climbing)?;
    Ok(neb::max_force_norm(&forces))
}
