//! Per-image freezing used by the staged relaxation.
//!
//! Freezing never removes an image from the chain: the tangent of a moving
//! image still needs its frozen neighbours' geometry. Frozen atoms get zero
//! effective force and are skipped when positions are written back.

use log::debug;

use crate::core::chain::Chain;
use crate::error::{NebError, Result};

/// Marks atoms that stay fixed in every image, across all stages.
pub fn pin_atoms(chain: &mut Chain, atoms: &[usize]) -> Result<()> {
    let natoms = chain.natoms();
    if let Some(bad) = atoms.iter().find(|&&a| a >= natoms) {
        return Err(NebError::Configuration(format!(
            "fixed atom index {} out of range ({} atoms)",
            bad, natoms
        )));
    }
    let mut pinned = atoms.to_vec();
    pinned.sort_unstable();
    pinned.dedup();
    chain.set_pinned_atoms(pinned);

    let all: Vec<usize> = (0..chain.len()).collect();
    unfreeze(chain, &all);
    Ok(())
}

/// Sets the frozen flag on every atom of the given images.
pub fn freeze(chain: &mut Chain, images: &[usize]) {
    for &i in images {
        chain.image_mut(i).structure.set_fixed_all(true);
    }
}

/// Clears the frozen flag on the given images, except for pinned atoms.
pub fn unfreeze(chain: &mut Chain, images: &[usize]) {
    let pinned = chain.pinned_atoms().to_vec();
    for &i in images {
        let structure = &mut chain.image_mut(i).structure;
        for (a, atom) in structure.atoms.iter_mut().enumerate() {
            atom.is_fixed = pinned.binary_search(&a).is_ok();
        }
    }
}

/// Freezes the whole chain, then releases only `active`.
pub fn freeze_all_except(chain: &mut Chain, active: &[usize]) {
    let all: Vec<usize> = (0..chain.len()).collect();
    freeze(chain, &all);
    unfreeze(chain, active);
    debug!("frozen all images except {:?}", active);
}

pub fn unfreeze_all(chain: &mut Chain) {
    let all: Vec<usize> = (0..chain.len()).collect();
    unfreeze(chain, &all);
}

/// Per-image "fully frozen" state.
pub fn frozen_images(chain: &Chain) -> Vec<bool> {
    chain
        .images()
        .iter()
        .map(|img| img.structure.is_frozen())
        .collect()
}
