use std::sync::atomic::Ordering;

use nalgebra::{Matrix3, Point3, Vector3};

use smartneb::analysis::profile::{locate_ts, EnergyProfile};
use smartneb::core::chain::{Chain, SpringConstants};
use smartneb::core::domain::{Atom, AtomicStructure, Lattice};
use smartneb::core::spatial;
use smartneb::engine::broker::{BatchMode, ForceBroker};
use smartneb::engine::evaluator::{Evaluator, ModelProperties};
use smartneb::engine::lj::LennardJones;
use smartneb::engine::minimizer::{Fire, FireParams, Minimizer, StopCriteria};
use smartneb::engine::neb;
use smartneb::engine::protocol;
use smartneb::error::NebError;
use smartneb::io::xyz;

use crate::common::{bead, bead_chain, BumpEvaluator, CountingEvaluator, FailingEvaluator};

mod common;

// --- Transition-state locator ---

#[test]
fn test_locate_ts_skips_nan() {
    assert_eq!(locate_ts(&[1.0, 5.0, 3.0, f64::NAN, 2.0]).unwrap(), 1);
    assert_eq!(locate_ts(&[f64::NAN, 0.5, f64::NAN]).unwrap(), 1);
}

#[test]
fn test_locate_ts_first_on_ties() {
    assert_eq!(locate_ts(&[0.0, 2.0, 1.0, 2.0, 0.0]).unwrap(), 1);
}

#[test]
fn test_locate_ts_all_nan() {
    assert!(matches!(locate_ts(&[f64::NAN; 4]), Err(NebError::NoValidEnergy)));
    assert!(matches!(locate_ts(&[]), Err(NebError::NoValidEnergy)));
}

#[test]
fn test_energy_profile_barriers() {
    let p = EnergyProfile::from_energies(&[-1.0, 0.5, 2.0, 0.0, -3.0]).unwrap();
    assert_eq!(p.ts_index, 2);
    assert!((p.forward_barrier - 3.0).abs() < 1e-12);
    assert!((p.reverse_barrier - 5.0).abs() < 1e-12);
    assert_eq!(p.relative[4], -2.0);
}

// --- Protocol ---

#[test]
fn test_protocol_parses_multiple_blocks() {
    let out = "\
@model_properties_format_version
0.1
# first structure
@energy
-1.5
@forces
0.1 0.0 0.0
0.0 -0.2 0.0

@model_properties_format_version
0.1
@energy
-2.5
@forces
0.0 0.0 0.3
0.0 0.0 0.0
@dipole
1.0 2.0 3.0
";
    let all = protocol::parse_all(out).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].energy, Some(-1.5));
    assert_eq!(all[0].forces.as_ref().unwrap()[1], Vector3::new(0.0, -0.2, 0.0));
    assert_eq!(all[1].energy, Some(-2.5));
    assert_eq!(all[1].dipole, Some(Vector3::new(1.0, 2.0, 3.0)));
}

#[test]
fn test_protocol_without_header_is_one_block() {
    let all = protocol::parse_all("@energy\n0.25\n@forces\n1 2 3\n").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].energy, Some(0.25));
}

#[test]
fn test_protocol_rejects_malformed_values() {
    assert!(matches!(
        protocol::parse_all("@energy\nnot-a-number\n"),
        Err(NebError::Parse(_))
    ));
    assert!(protocol::parse_all("@forces\n1.0 2.0\n").is_err());
    assert!(protocol::parse_all("@stress\n1 0 0\n0 1 0\n").is_err());
}

#[test]
fn test_protocol_display_is_parseable() {
    let s = AtomicStructure::from_atoms(
        "",
        vec![
            Atom::new("C", Point3::new(0.0, 0.0, 0.0)),
            Atom::new("O", Point3::new(0.0, 0.0, 1.2)),
        ],
    );
    let mp = ModelProperties {
        structure: Some(s),
        energy: Some(-12.345678),
        forces: Some(vec![Vector3::new(0.1, 0.2, 0.3), Vector3::new(-0.1, -0.2, -0.3)]),
        dipole: None,
        stress: Some(Matrix3::identity()),
    };
    let text = format!("{}{}", mp, mp);

    let all = protocol::parse_all(&text).unwrap();
    assert_eq!(all.len(), 2);
    let back = &all[1];
    assert!((back.energy.unwrap() + 12.345678).abs() < 1e-9);
    assert_eq!(back.structure.as_ref().unwrap().symbols(), vec!["C", "O"]);
    assert!((back.forces.as_ref().unwrap()[1].z + 0.3).abs() < 1e-12);
    assert_eq!(back.stress, Some(Matrix3::identity()));
}

// --- Broker ---

#[test]
fn test_batched_refresh_is_one_call() {
    let eval = CountingEvaluator::new();
    let batch_calls = eval.batch_calls.clone();
    let single_calls = eval.single_calls.clone();
    let mut broker = ForceBroker::new(Box::new(eval), BatchMode::Batched);
    let mut chain = Chain::new(bead_chain(11)).unwrap();
    assert_eq!(broker.mode(), BatchMode::Batched);
    assert_eq!(broker.evaluator_name(), "Counting Evaluator");

    let interior = chain.interior();
    let computed = broker.refresh(&mut chain, interior.clone()).unwrap();
    assert_eq!(computed, 9);
    assert_eq!(broker.calls(), 1);
    assert_eq!(batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(single_calls.load(Ordering::SeqCst), 0);

    // nothing stale -> no call
    broker.refresh(&mut chain, interior).unwrap();
    assert_eq!(broker.calls(), 1);
}

#[test]
fn test_single_mode_calls_per_structure() {
    let eval = CountingEvaluator::new();
    let single_calls = eval.single_calls.clone();
    let mut broker = ForceBroker::new(Box::new(eval), BatchMode::Single);
    let mut chain = Chain::new(bead_chain(5)).unwrap();

    broker.evaluate_chain(&mut chain).unwrap();
    assert_eq!(broker.calls(), 5);
    assert_eq!(single_calls.load(Ordering::SeqCst), 5);
    assert_eq!(chain.evaluation_counts(), vec![1; 5]);

    // only the moved image is recomputed
    let moved = vec![Point3::new(2.2, 0.0, 0.0), Point3::new(0.0, 0.0, 10.0)];
    chain.image_mut(2).structure.set_positions(&moved).unwrap();
    broker.refresh(&mut chain, 0..5).unwrap();
    assert_eq!(broker.calls(), 6);
    assert_eq!(chain.evaluation_counts(), vec![1, 1, 2, 1, 1]);
}

#[test]
fn test_batched_count_mismatch_is_protocol_error() {
    let mut eval = CountingEvaluator::new();
    eval.short_batches = true;
    let mut broker = ForceBroker::new(Box::new(eval), BatchMode::Batched);
    let mut chain = Chain::new(bead_chain(5)).unwrap();

    let err = broker.refresh(&mut chain, 0..5).unwrap_err();
    assert!(matches!(err, NebError::Protocol(_)));
    // no partial results were stored
    assert_eq!(chain.stale_indices(0..5).len(), 5);
}

#[test]
fn test_wrong_force_count_is_protocol_error() {
    struct ShortForces;
    impl Evaluator for ShortForces {
        fn evaluate(&self, _s: &AtomicStructure) -> smartneb::error::Result<ModelProperties> {
            Ok(ModelProperties {
                energy: None,
                forces: Some(vec![Vector3::zeros()]),
                ..Default::default()
            })
        }
        fn name(&self) -> &str {
            "short"
        }
    }

    let mut broker = ForceBroker::new(Box::new(ShortForces), BatchMode::Single);
    let err = broker.evaluate(&[bead(0.0)]).unwrap_err();
    assert!(matches!(err, NebError::Protocol(_)));

    // a missing energy alone is tolerated and becomes NaN
    let one_atom = AtomicStructure::from_atoms("a", vec![Atom::new("X", Point3::origin())]);
    let results = broker.evaluate(&[one_atom]).unwrap();
    assert!(results[0].energy.is_nan());
}

#[test]
fn test_evaluator_failure_propagates() {
    let mut broker = ForceBroker::new(Box::new(FailingEvaluator), BatchMode::Single);
    let mut chain = Chain::new(bead_chain(3)).unwrap();
    assert!(matches!(
        broker.evaluate_chain(&mut chain),
        Err(NebError::Evaluation(_))
    ));
}

// --- NEB force model ---

fn evaluated_chain(images: Vec<AtomicStructure>, evaluator: Box<dyn Evaluator>) -> Chain {
    let mut chain = Chain::new(images).unwrap();
    let mut broker = ForceBroker::new(evaluator, BatchMode::Single);
    broker.evaluate_chain(&mut chain).unwrap();
    chain
}

/// A pulling force perpendicular to a straight, evenly spaced band.
struct SidewaysPull;

impl Evaluator for SidewaysPull {
    fn evaluate(&self, s: &AtomicStructure) -> smartneb::error::Result<ModelProperties> {
        let x = s.atoms[0].position.x;
        let mut forces = vec![Vector3::zeros(); s.natoms()];
        forces[0] = Vector3::new(0.3, 0.7, 0.0);
        Ok(ModelProperties {
            energy: Some(x * (4.0 - x)),
            forces: Some(forces),
            ..Default::default()
        })
    }
    fn name(&self) -> &str {
        "sideways"
    }
}

#[test]
fn test_equal_spacing_leaves_only_perpendicular_force() {
    let chain = evaluated_chain(bead_chain(5), Box::new(SidewaysPull));
    let forces = neb::effective_forces(&chain, &SpringConstants::uniform(), None).unwrap();

    assert_eq!(forces.len(), 5);
    assert!(forces[0].iter().all(|f| *f == Vector3::zeros()));
    assert!(forces[4].iter().all(|f| *f == Vector3::zeros()));
    for i in 1..4 {
        let f = forces[i][0];
        assert!(f.x.abs() < 1e-12, "image {}: parallel part {}", i, f.x);
        assert!((f.y - 0.7).abs() < 1e-12);
        assert_eq!(forces[i][1], Vector3::zeros());
    }
}

#[test]
fn test_spring_force_pulls_toward_midpoint() {
    let images = vec![bead(0.0), bead(0.5), bead(2.0)];
    let chain = evaluated_chain(images, Box::new(CountingEvaluator::new()));
    let forces = neb::effective_forces(&chain, &SpringConstants::Uniform(2.0), None).unwrap();

    // k (|d+| - |d-|) = 2 (1.5 - 0.5)
    assert!((forces[1][0].x - 2.0).abs() < 1e-12);
}

#[test]
fn test_climbing_image_inverts_parallel_force() {
    let chain = evaluated_chain(bead_chain(5), Box::new(SidewaysPull));
    let forces = neb::effective_forces(&chain, &SpringConstants::uniform(), Some(2)).unwrap();

    // energies 0,3,4,3,0: tangent at the top is along x
    let f = forces[2][0];
    assert!((f.x + 0.3).abs() < 1e-12);
    assert!((f.y - 0.7).abs() < 1e-12);
}

#[test]
fn test_fixed_atoms_get_zero_force() {
    let mut images = bead_chain(5);
    images[2].atoms[0].is_fixed = true;
    let chain = evaluated_chain(images, Box::new(SidewaysPull));
    let forces = neb::effective_forces(&chain, &SpringConstants::uniform(), None).unwrap();

    assert_eq!(forces[2][0], Vector3::zeros());
    assert!(forces[1][0].norm() > 0.0);
}

#[test]
fn test_tangent_falls_back_to_bisection_on_nan() {
    let minus = vec![Vector3::new(2.0, 0.0, 0.0)];
    let plus = vec![Vector3::new(0.0, 3.0, 0.0)];

    let tau = neb::tangent(&minus, &plus, [0.0, f64::NAN, 1.0]);
    let s = 1.0 / 2f64.sqrt();
    assert!((tau[0] - Vector3::new(s, s, 0.0)).norm() < 1e-12);

    // rising energies pick the forward tangent
    let tau = neb::tangent(&minus, &plus, [0.0, 1.0, 2.0]);
    assert!((tau[0] - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
}

#[test]
fn test_max_force_norm() {
    let f = vec![
        vec![Vector3::new(3.0, 4.0, 0.0)],
        vec![Vector3::new(0.0, 0.0, -6.0), Vector3::zeros()],
    ];
    assert_eq!(neb::max_force_norm(&f), 6.0);
}

// --- Evaluators & minimizer ---

#[test]
fn test_lj_forces_match_finite_differences() {
    let lj = LennardJones::default();
    let s = AtomicStructure::from_atoms(
        "trimer",
        vec![
            Atom::new("Ar", Point3::new(0.0, 0.0, 0.0)),
            Atom::new("Ar", Point3::new(1.15, 0.1, 0.0)),
            Atom::new("Ar", Point3::new(0.4, 1.05, 0.2)),
        ],
    );
    let mp = lj.evaluate(&s).unwrap();
    let forces = mp.forces.unwrap();

    let h = 1e-6;
    for a in 0..3 {
        for k in 0..3 {
            let mut plus = s.clone();
            let mut minus = s.clone();
            plus.atoms[a].position[k] += h;
            minus.atoms[a].position[k] -= h;
            let ep = lj.evaluate(&plus).unwrap().energy.unwrap();
            let em = lj.evaluate(&minus).unwrap().energy.unwrap();
            let numeric = -(ep - em) / (2.0 * h);
            assert!(
                (forces[a][k] - numeric).abs() < 1e-5,
                "atom {} dim {}: {} vs {}",
                a,
                k,
                forces[a][k],
                numeric
            );
        }
    }
}

#[test]
fn test_lj_dimer_minimum() {
    let r0 = 2f64.powf(1.0 / 6.0);
    let s = AtomicStructure::from_atoms(
        "dimer",
        vec![
            Atom::new("Ar", Point3::origin()),
            Atom::new("Ar", Point3::new(r0, 0.0, 0.0)),
        ],
    );
    let mp = LennardJones::default().evaluate(&s).unwrap();
    assert!((mp.energy.unwrap() + 1.0).abs() < 1e-12);
    assert!(spatial::max_atom_norm(&mp.forces.unwrap()) < 1e-10);
}

#[test]
fn test_fire_relaxes_harmonic_well() {
    let mut x = vec![Vector3::new(1.0, -0.5, 0.3), Vector3::new(-0.8, 0.2, 0.0)];
    let mut calls = 0;
    let mut force_fn = |c: &[Vector3<f64>]| -> smartneb::error::Result<Vec<Vector3<f64>>> {
        calls += 1;
        Ok(c.iter().map(|v| -v).collect())
    };

    let mut fire = Fire::new(FireParams::default());
    let report = fire
        .minimize(&mut x, &mut force_fn, StopCriteria { fmax: 1e-3, max_steps: 1000 })
        .unwrap();

    assert!(report.converged);
    assert!(report.fmax < 1e-3);
    assert_eq!(report.force_calls, report.steps + 1);
    assert!(x.iter().all(|v| v.norm() < 1e-3));
    drop(force_fn);
    assert_eq!(calls, report.force_calls);
}

#[test]
fn test_fire_respects_step_budget_and_max_displacement() {
    let start = vec![Vector3::new(50.0, 0.0, 0.0)];
    let mut x = start.clone();
    let mut force_fn =
        |c: &[Vector3<f64>]| -> smartneb::error::Result<Vec<Vector3<f64>>> { Ok(c.iter().map(|v| -v).collect()) };

    let mut fire = Fire::default();
    let report = fire
        .minimize(&mut x, &mut force_fn, StopCriteria { fmax: 1e-3, max_steps: 3 })
        .unwrap();

    assert!(!report.converged);
    assert_eq!(report.steps, 3);
    assert_eq!(report.force_calls, 4);
    // at most 0.1 per step
    assert!((start[0] - x[0]).norm() <= 0.3 + 1e-12);
    assert!((report.fmax - x[0].norm()).abs() < 1e-12);
}

// --- XYZ ---

#[test]
fn test_xyz_roundtrip_with_lattice() {
    let mut s = bead(1.25);
    s.title = "energy = -3.5".into();
    s.lattice = Lattice::new(
        Vector3::new(5.0, 0.0, 0.0),
        Vector3::new(0.0, 6.0, 0.0),
        Vector3::new(0.0, 0.0, 7.0),
    );
    let other = bead(2.0);

    let text = xyz::format_frames([&s, &other]);
    let frames = xyz::parse_frames(&text).unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].title, "energy = -3.5");
    assert_eq!(frames[0].lattice, s.lattice);
    assert!(frames[1].lattice.is_none());
    assert_eq!(frames[0].symbols(), vec!["X", "Y"]);
    assert!((frames[1].atoms[0].position.x - 2.0).abs() < 1e-9);
}

#[test]
fn test_xyz_title_line_breaks_become_spaces() {
    let mut s = bead(0.5);
    s.title = "step 3\r\nenergy = -1.0\n".into();
    let text = xyz::format_frames([&s, &bead(1.0)]);
    let frames = xyz::parse_frames(&text).unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].title, "step 3  energy = -1.0");
    assert_eq!(frames[0].positions(), s.positions());
}

#[test]
fn test_xyz_truncated_frame_is_error() {
    let text = "3\ncomment\nH 0 0 0\nH 0 0 1\n";
    assert!(matches!(xyz::parse_frames(text), Err(NebError::Parse(_))));
}

#[test]
fn test_bump_evaluator_profile() {
    let chain = evaluated_chain(bead_chain(5), Box::new(BumpEvaluator));
    let e = chain.energies();
    let expected = [0.0, 1.0, 3.0, 1.0, 0.0];
    for (a, b) in e.iter().zip(expected) {
        assert!((a - b).abs() < 1e-12);
    }
}

// --- External black-box evaluator ---

#[cfg(unix)]
mod blackbox {
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::bounded;
    use nalgebra::Point3;

    use smartneb::core::domain::{Atom, AtomicStructure};
    use smartneb::engine::evaluator::Evaluator;
    use smartneb::engine::external::blackbox::BlackBoxEvaluator;
    use smartneb::error::NebError;

    use crate::common::{bead, scratch_dir};

    const BLOCK: &str = r"@model_properties_format_version\n0.1\n@energy\n-1.25\n@forces\n0.5 0 0\n0 0 0\n";
    const ENERGY_ONLY: &str = r"@model_properties_format_version\n0.1\n@energy\n-2.5\n";

    /// A structure whose xyz text is well over a pipe buffer.
    fn large_structure() -> AtomicStructure {
        let atoms = (0..3000)
            .map(|i| Atom::new("Ar", Point3::new(i as f64 * 3.5, 0.25, -0.75)))
            .collect();
        AtomicStructure::from_atoms("large", atoms)
    }

    /// Evaluates on a worker thread; `None` if it did not finish in time.
    fn evaluate_with_deadline(cmd: String, root: std::path::PathBuf) -> Option<Result<f64, NebError>> {
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let eval = BlackBoxEvaluator::new(&cmd, Some(root));
            let res = eval
                .evaluate(&large_structure())
                .map(|mp| mp.energy.unwrap_or(f64::NAN));
            let _ = tx.send(res);
        });
        rx.recv_timeout(Duration::from_secs(30)).ok()
    }

    fn leftover_dirs(root: &std::path::Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn test_command_output_is_parsed() {
        let root = scratch_dir("bb-ok");
        let cmd = format!("test -s {{input}} && cat > /dev/null && printf '{}{}'", BLOCK, BLOCK);
        let eval = BlackBoxEvaluator::new(&cmd, Some(root.clone()));

        let all = eval.evaluate_many(&[bead(0.0), bead(1.0)]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].energy, Some(-1.25));
        assert_eq!(all[0].forces.as_ref().unwrap()[0].x, 0.5);
        // scratch directory is cleaned up after success
        assert_eq!(leftover_dirs(&root), 0);

        // a single structure must get exactly one block back
        assert!(matches!(eval.evaluate(&bead(0.0)), Err(NebError::Protocol(_))));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_stderr_output_fails_and_keeps_scratch() {
        let root = scratch_dir("bb-stderr");
        let cmd = format!("echo 'SCF did not converge' >&2; printf '{}'", BLOCK);
        let eval = BlackBoxEvaluator::new(&cmd, Some(root.clone()));

        let err = eval.evaluate(&bead(0.0)).unwrap_err();
        match err {
            NebError::Evaluation(msg) => assert!(msg.contains("SCF did not converge")),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(leftover_dirs(&root), 1);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let root = scratch_dir("bb-exit");
        let eval = BlackBoxEvaluator::new("exit 3", Some(root.clone()));
        assert!(matches!(
            eval.evaluate(&bead(0.0)),
            Err(NebError::Evaluation(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_large_input_echoed_before_reading_stdin() {
        let root = scratch_dir("bb-large");
        // stdout fills up before stdin has been drained
        let cmd = format!("sed 's/^/# /' {{input}}; cat > /dev/null; printf '{}'", ENERGY_ONLY);

        let res = evaluate_with_deadline(cmd, root.clone()).expect("evaluator hung");
        assert_eq!(res.unwrap(), -2.5);
        assert_eq!(leftover_dirs(&root), 0);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_command_closing_stdin_early_succeeds() {
        let root = scratch_dir("bb-closed");
        let cmd = format!("exec 0<&-; printf '{}'", ENERGY_ONLY);

        let res = evaluate_with_deadline(cmd, root.clone()).expect("evaluator hung");
        assert_eq!(res.unwrap(), -2.5);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_unparsable_output_is_evaluation_error() {
        let root = scratch_dir("bb-garbage");
        let cmd = r"printf '@model_properties_format_version\n0.1\n@energy\nnot-a-number\n'";
        let eval = BlackBoxEvaluator::new(cmd, Some(root.clone()));

        match eval.evaluate(&bead(0.0)) {
            Err(NebError::Evaluation(msg)) => assert!(msg.contains("not-a-number"), "{}", msg),
            other => panic!("unexpected result {:?}", other),
        }

        let _ = std::fs::remove_dir_all(root);
    }
}
