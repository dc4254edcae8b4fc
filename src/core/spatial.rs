use nalgebra::{Point3, Vector3};
use crate::core::domain::{AtomicStructure, Lattice};

/// Calculates the separation vector p2 - p1.
/// If `lattice` is provided, applies Minimum Image Convention (MIC).
#[inline]
pub fn separation(p1: &Point3<f64>, p2: &Point3<f64>, lattice: Option<&Lattice>) -> Vector3<f64> {
    let d_cart = p2 - p1;
    match lattice {
        Some(lat) => {
            // Periodic: Wrap fractional delta to [-0.5, 0.5]
            let mut d_frac = lat.inverse * d_cart;
            d_frac.x -= d_frac.x.round();
            d_frac.y -= d_frac.y.round();
            d_frac.z -= d_frac.z.round();
            lat.vectors * d_frac
        }
        None => d_cart,
    }
}

/// Calculates the squared distance between two points, MIC-aware.
#[inline]
pub fn distance_sq(p1: &Point3<f64>, p2: &Point3<f64>, lattice: Option<&Lattice>) -> f64 {
    separation(p1, p2, lattice).norm_squared()
}

/// Dense interatomic distance matrix (row-major, n x n).
pub fn distance_matrix(structure: &AtomicStructure) -> Vec<f64> {
    let n = structure.natoms();
    let lattice = structure.lattice.as_ref();
    let mut dm = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = distance_sq(
                &structure.atoms[i].position,
                &structure.atoms[j].position,
                lattice,
            )
            .sqrt();
            dm[i * n + j] = d;
            dm[j * n + i] = d;
        }
    }
    dm
}

/// Per-atom displacement vectors from `from` to `to` (no MIC: images of a
/// path are compared atom by atom in Cartesian space).
pub fn displacements(from: &AtomicStructure, to: &AtomicStructure) -> Vec<Vector3<f64>> {
    debug_assert_eq!(from.natoms(), to.natoms());
    from.atoms
        .iter()
        .zip(&to.atoms)
        .map(|(a, b)| b.position - a.position)
        .collect()
}

// --- 3N-vector helpers ---

#[inline]
pub fn dot(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

#[inline]
pub fn norm(a: &[Vector3<f64>]) -> f64 {
    dot(a, a).sqrt()
}

/// Largest per-atom vector norm.
pub fn max_atom_norm(a: &[Vector3<f64>]) -> f64 {
    a.iter().map(|v| v.norm()).fold(0.0, f64::max)
}

/// Scales `a` in place to unit length. Returns the original norm.
pub fn normalize_mut(a: &mut [Vector3<f64>]) -> f64 {
    let n = norm(a);
    if n > 0.0 {
        for v in a.iter_mut() {
            *v /= n;
        }
    }
    n
}
