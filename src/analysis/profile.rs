use std::fmt;

use serde::Serialize;

use crate::core::chain::Chain;
use crate::error::{NebError, Result};

/// Index of the highest-energy image, the transition-state candidate.
///
/// NaN entries (failed evaluations) are ignored; ties go to the lowest index.
pub fn locate_ts(energies: &[f64]) -> Result<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &e) in energies.iter().enumerate() {
        if e.is_nan() {
            continue;
        }
        match best {
            Some((_, emax)) if e <= emax => {}
            _ => best = Some((i, e)),
        }
    }
    best.map(|(i, _)| i).ok_or(NebError::NoValidEnergy)
}

/// Energy profile along a chain.
#[derive(Debug, Clone, Serialize)]
pub struct EnergyProfile {
    pub energies: Vec<f64>,
    /// Energies relative to image 0.
    pub relative: Vec<f64>,
    pub ts_index: usize,
    /// E(ts) - E(reactant)
    pub forward_barrier: f64,
    /// E(ts) - E(product)
    pub reverse_barrier: f64,
}

impl EnergyProfile {
    pub fn from_energies(energies: &[f64]) -> Result<Self> {
        let ts_index = locate_ts(energies)?;
        let e0 = energies[0];
        let e_ts = energies[ts_index];
        let e_last = energies[energies.len() - 1];

        Ok(Self {
            energies: energies.to_vec(),
            relative: energies.iter().map(|e| e - e0).collect(),
            ts_index,
            forward_barrier: e_ts - e0,
            reverse_barrier: e_ts - e_last,
        })
    }

    pub fn from_chain(chain: &Chain) -> Result<Self> {
        Self::from_energies(&chain.energies())
    }
}

impl fmt::Display for EnergyProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{:>5} {:>18} {:>14}", "image", "energy", "relative")?;
        for (i, (e, r)) in self.energies.iter().zip(&self.relative).enumerate() {
            let mark = if i == self.ts_index { " <- TS" } else { "" };
            writeln!(f, "{:>5} {:>18.8} {:>14.6}{}", i, e, r, mark)?;
        }
        writeln!(f, "forward barrier: {:.6}", self.forward_barrier)?;
        write!(f, "reverse barrier: {:.6}", self.reverse_barrier)
    }
}
