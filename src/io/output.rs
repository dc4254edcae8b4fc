//! Files written at the end of a run.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::core::chain::Chain;
use crate::core::domain::AtomicStructure;
use crate::error::Result;
use crate::io::xyz;
use crate::solvers::smart_neb::NebOutcome;

pub const IMAGES_FILE: &str = "neb-images.xyz";
pub const TS_FILE: &str = "ts.xyz";
pub const STAGE0_FILE: &str = "stage0.xyz";
pub const SUMMARY_CSV: &str = "summary.csv";
pub const SUMMARY_TXT: &str = "summary.txt";

#[derive(Serialize)]
struct ImageRow {
    image: usize,
    energy: f64,
    relative_energy: f64,
    evaluations: usize,
    is_ts: bool,
}

/// Chain frames with the energy recorded in each comment line.
fn labelled_frames(chain: &Chain) -> Vec<AtomicStructure> {
    chain
        .images()
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let mut s = img.structure.clone();
            s.title = format!("image {:02}: energy = {:.8}", i, img.energy());
            s
        })
        .collect()
}

/// The freshly built chain, before any relaxation.
pub fn write_stage0(dir: &Path, chain: &Chain) -> Result<()> {
    fs::create_dir_all(dir)?;
    xyz::write_all(dir.join(STAGE0_FILE), &labelled_frames(chain))?;
    Ok(())
}

/// Persists relaxed chain, TS image and energy summaries into `dir`.
pub fn persist(dir: &Path, outcome: &NebOutcome) -> Result<()> {
    fs::create_dir_all(dir)?;
    let frames = labelled_frames(&outcome.chain);

    xyz::write_all(dir.join(IMAGES_FILE), &frames)?;
    xyz::write_one(dir.join(TS_FILE), &frames[outcome.ts_index])?;

    let counts = outcome.chain.evaluation_counts();
    let mut wtr = csv::Writer::from_path(dir.join(SUMMARY_CSV))?;
    for (i, (e, r)) in outcome
        .profile
        .energies
        .iter()
        .zip(&outcome.profile.relative)
        .enumerate()
    {
        wtr.serialize(ImageRow {
            image: i,
            energy: *e,
            relative_energy: *r,
            evaluations: counts[i],
            is_ts: i == outcome.ts_index,
        })?;
    }
    wtr.flush()?;

    fs::write(dir.join(SUMMARY_TXT), summary_text(outcome))?;
    info!("results written to {}", dir.display());
    Ok(())
}

pub fn summary_text(outcome: &NebOutcome) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "# smartneb summary ({})", chrono::Local::now().to_rfc3339());
    let _ = writeln!(s, "converged:        {}", outcome.converged);
    let _ = writeln!(s, "cycles:           {}", outcome.cycles);
    let _ = writeln!(s, "final fmax:       {:.6}", outcome.final_fmax);
    let _ = writeln!(s, "TS image:         {}", outcome.ts_index);
    let _ = writeln!(s, "evaluator calls:  {}", outcome.evaluator_calls);
    let _ = writeln!(s, "per-image evals:  {:?}", outcome.chain.evaluation_counts());
    let _ = writeln!(s);
    let _ = writeln!(s, "{}", outcome.profile);
    s
}
