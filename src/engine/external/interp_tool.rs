use std::fs;
use std::path::PathBuf;
use std::process::Command;

use log::{info, warn};
use uuid::Uuid;

use crate::core::domain::AtomicStructure;
use crate::error::{NebError, Result};
use crate::io::xyz;

/// Wrapper around an rxview-style geometry interpolation program:
///
/// ```text
/// <tool> r.xyz p.xyz [-m m.xyz] images.xyz -n <count> <scheme flag>
/// ```
pub struct GeometryTool {
    program: String,
}

impl GeometryTool {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Runs the tool and returns the raw frames it produced.
    pub fn run(
        &self,
        reactant: &AtomicStructure,
        waypoint: Option<&AtomicStructure>,
        product: &AtomicStructure,
        nimages: usize,
        scheme_flag: &str,
    ) -> Result<Vec<AtomicStructure>> {
        let scrdir: PathBuf = std::env::temp_dir().join(format!("smartneb-interp-{}", Uuid::new_v4()));
        fs::create_dir_all(&scrdir)?;

        xyz::write_one(scrdir.join("r.xyz"), reactant)?;
        xyz::write_one(scrdir.join("p.xyz"), product)?;

        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&scrdir).arg("r.xyz").arg("p.xyz");
        if let Some(m) = waypoint {
            xyz::write_one(scrdir.join("m.xyz"), m)?;
            cmd.arg("-m").arg("m.xyz");
        }
        cmd.arg("images.xyz").arg("-n").arg(nimages.to_string());
        cmd.args(scheme_flag.split_whitespace());

        info!("interpolating with {} (scheme flag {:?})", self.program, scheme_flag);
        let output = cmd.output().map_err(|e| {
            NebError::ExternalTool(format!("failed to launch {}: {}", self.program, e))
        })?;
        if !output.status.success() {
            return Err(NebError::ExternalTool(format!(
                "{} exited with {} (scratch: {}): {}",
                self.program,
                output.status,
                scrdir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let frames = xyz::read_all(scrdir.join("images.xyz"))
            .map_err(|e| NebError::ExternalTool(format!("{}: unreadable output: {}", self.program, e)))?;
        if frames.len() != nimages {
            return Err(NebError::ExternalTool(format!(
                "{} produced {} images, expected {}",
                self.program,
                frames.len(),
                nimages
            )));
        }

        if let Err(e) = fs::remove_dir_all(&scrdir) {
            warn!("could not remove {}: {}", scrdir.display(), e);
        }
        Ok(frames)
    }
}
