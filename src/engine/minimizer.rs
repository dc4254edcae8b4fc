//! Black-box minimization over flat sets of per-atom coordinates.

use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::spatial::{dot, max_atom_norm, norm};
use crate::error::Result;

/// Force callback: coordinates in, forces (negative gradient) out.
pub type ForceFn<'a> = dyn FnMut(&[Vector3<f64>]) -> Result<Vec<Vector3<f64>>> + 'a;

/// When a minimization stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopCriteria {
    /// Converged once the largest per-atom force drops below this.
    pub fmax: f64,
    /// Upper bound on the number of position updates.
    pub max_steps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeReport {
    pub converged: bool,
    pub steps: usize,
    /// Largest per-atom force at the final coordinates.
    pub fmax: f64,
    pub force_calls: usize,
}

pub trait Minimizer {
    /// Moves `x` downhill along `force_fn` until `criteria` is met.
    fn minimize(
        &mut self,
        x: &mut [Vector3<f64>],
        force_fn: &mut ForceFn<'_>,
        criteria: StopCriteria,
    ) -> Result<MinimizeReport>;
}

// --- FIRE ---

/// Parameters of the Fast Inertial Relaxation Engine
/// (Bitzek et al., PRL 97, 170201, 2006).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireParams {
    pub dt: f64,
    pub dt_max: f64,
    /// Initial velocity mixing factor.
    pub alpha: f64,
    pub f_alpha: f64,
    pub f_inc: f64,
    pub f_dec: f64,
    /// Downhill steps before dt may grow.
    pub n_min: usize,
    /// Cap on the displacement of any single atom per step.
    pub max_disp: f64,
}

impl Default for FireParams {
    fn default() -> Self {
        Self {
            dt: 0.1,
            dt_max: 1.0,
            alpha: 0.1,
            f_alpha: 0.99,
            f_inc: 1.1,
            f_dec: 0.5,
            n_min: 5,
            max_disp: 0.1,
        }
    }
}

/// FIRE minimizer. Internal state is reset on every `minimize` call.
#[derive(Debug, Clone, Default)]
pub struct Fire {
    pub params: FireParams,
}

impl Fire {
    pub fn new(params: FireParams) -> Self {
        Self { params }
    }
}

impl Minimizer for Fire {
    fn minimize(
        &mut self,
        x: &mut [Vector3<f64>],
        force_fn: &mut ForceFn<'_>,
        criteria: StopCriteria,
    ) -> Result<MinimizeReport> {
        let p = &self.params;
        let mut dt = p.dt;
        let mut alpha = p.alpha;
        let mut n_pos = 0;
        let mut velocity = vec![Vector3::zeros(); x.len()];

        let mut forces = force_fn(x)?;
        let mut force_calls = 1;
        let mut steps = 0;

        loop {
            let fmax = max_atom_norm(&forces);
            debug!("FIRE step {:3}: fmax = {:-10.5}, dt = {:6.4}", steps, fmax, dt);
            if fmax < criteria.fmax || steps >= criteria.max_steps {
                return Ok(MinimizeReport {
                    converged: fmax < criteria.fmax,
                    steps,
                    fmax,
                    force_calls,
                });
            }

            // power; the very first step starts from rest
            if steps > 0 {
                if dot(&forces, &velocity) > 0.0 {
                    let fnorm = norm(&forces);
                    let vnorm = norm(&velocity);
                    if fnorm > 0.0 {
                        for (v, f) in velocity.iter_mut().zip(&forces) {
                            *v = (1.0 - alpha) * *v + alpha * vnorm * f / fnorm;
                        }
                    }
                    if n_pos > p.n_min {
                        dt = (dt * p.f_inc).min(p.dt_max);
                        alpha *= p.f_alpha;
                    }
                    n_pos += 1;
                } else {
                    velocity.iter_mut().for_each(|v| *v = Vector3::zeros());
                    alpha = p.alpha;
                    dt *= p.f_dec;
                    n_pos = 0;
                }
            }

            // Euler MD step
            for (v, f) in velocity.iter_mut().zip(&forces) {
                *v += dt * f;
            }
            let mut disp: Vec<_> = velocity.iter().map(|v| dt * v).collect();
            let largest = max_atom_norm(&disp);
            if largest > p.max_disp {
                let scale = p.max_disp / largest;
                disp.iter_mut().for_each(|d| *d *= scale);
            }
            for (xi, d) in x.iter_mut().zip(&disp) {
                *xi += d;
            }

            steps += 1;
            forces = force_fn(x)?;
            force_calls += 1;
        }
    }
}
