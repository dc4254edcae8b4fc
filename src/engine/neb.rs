//! Nudged elastic band force projection.
//!
//! Improved tangent: G. Henkelman and H. Jónsson, J. Chem. Phys. 113, 9978 (2000).
//! Climbing image: G. Henkelman, B. P. Uberuaga, H. Jónsson, J. Chem. Phys. 113, 9901 (2000).

use nalgebra::Vector3;

use crate::core::chain::{Chain, SpringConstants};
use crate::core::spatial::{displacements, dot, max_atom_norm, norm, normalize_mut};
use crate::error::Result;

type Forces = Vec<Vector3<f64>>;

/// Normalized local tangent at an interior image.
///
/// `e` holds the energies of the previous, current and next image. When any
/// of them is undefined, or the weighted tangent vanishes on a flat stretch,
/// the bisection tangent is used instead.
pub fn tangent(tau_minus: &[Vector3<f64>], tau_plus: &[Vector3<f64>], e: [f64; 3]) -> Forces {
    let [e_prev, e_cur, e_next] = e;
    if e.iter().any(|x| x.is_nan()) {
        return bisection(tau_minus, tau_plus);
    }

    let mut tau: Forces = if e_next > e_cur && e_cur > e_prev {
        tau_plus.to_vec()
    } else if e_next < e_cur && e_cur < e_prev {
        tau_minus.to_vec()
    } else {
        let dv_next = (e_next - e_cur).abs();
        let dv_prev = (e_prev - e_cur).abs();
        let dv_max = dv_next.max(dv_prev);
        let dv_min = dv_next.min(dv_prev);
        let (wp, wm) = if e_next > e_prev {
            (dv_max, dv_min)
        } else {
            (dv_min, dv_max)
        };
        tau_plus
            .iter()
            .zip(tau_minus)
            .map(|(p, m)| wp * p + wm * m)
            .collect()
    };

    if normalize_mut(&mut tau) == 0.0 {
        return bisection(tau_minus, tau_plus);
    }
    tau
}

fn bisection(tau_minus: &[Vector3<f64>], tau_plus: &[Vector3<f64>]) -> Forces {
    let nm = norm(tau_minus);
    let np = norm(tau_plus);
    let mut tau: Forces = tau_plus
        .iter()
        .zip(tau_minus)
        .map(|(p, m)| {
            let a = if np > 0.0 { p / np } else { Vector3::zeros() };
            let b = if nm > 0.0 { m / nm } else { Vector3::zeros() };
            a + b
        })
        .collect();
    normalize_mut(&mut tau);
    tau
}

/// Effective NEB forces for every image of `chain`.
///
/// The returned vector is indexed like the chain; endpoint entries are all
/// zero. Every image must carry a current evaluation result. Atoms marked
/// fixed receive exactly zero force. `climbing` selects the image that is
/// pushed uphill along the tangent instead of being held by springs.
pub fn effective_forces(
    chain: &Chain,
    springs: &SpringConstants,
    climbing: Option<usize>,
) -> Result<Vec<Forces>> {
    let n = chain.len();
    let natoms = chain.natoms();
    let mut all = vec![vec![Vector3::zeros(); natoms]; n];

    for i in chain.interior() {
        let prev = chain.image(i - 1);
        let cur = chain.image(i);
        let next = chain.image(i + 1);

        let tau_minus = displacements(&prev.structure, &cur.structure);
        let tau_plus = displacements(&cur.structure, &next.structure);
        let energies = [
            prev.fresh_result()?.energy,
            cur.fresh_result()?.energy,
            next.fresh_result()?.energy,
        ];
        let tau = tangent(&tau_minus, &tau_plus, energies);

        let true_force = &cur.fresh_result()?.forces;
        let f_tau = dot(true_force, &tau);

        let f_eff: Forces = if climbing == Some(i) {
            true_force
                .iter()
                .zip(&tau)
                .map(|(f, t)| f - 2.0 * f_tau * t)
                .collect()
        } else {
            let spring = springs.link(i) * norm(&tau_plus) - springs.link(i - 1) * norm(&tau_minus);
            true_force
                .iter()
                .zip(&tau)
                .map(|(f, t)| f - f_tau * t + spring * t)
                .collect()
        };

        for ((slot, f), atom) in all[i].iter_mut().zip(f_eff).zip(&cur.structure.atoms) {
            if !atom.is_fixed {
                *slot = f;
            }
        }
    }

    Ok(all)
}

/// Largest per-atom norm over a set of image forces.
pub fn max_force_norm(forces: &[Forces]) -> f64 {
    forces.iter().map(|f| max_atom_norm(f)).fold(0.0, f64::max)
}
