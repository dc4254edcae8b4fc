use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::domain::AtomicStructure;
use crate::engine::evaluator::{Evaluator, ModelProperties};
use crate::engine::protocol;
use crate::error::{NebError, Result};
use crate::io::xyz;

/// Universal wrapper for an external evaluator defined by a user command.
///
/// The structures are written as multi-frame XYZ into `input.xyz` inside a
/// fresh scratch directory and also streamed to the command's stdin. The
/// command must print one `@model_properties_*` block per structure.
pub struct BlackBoxEvaluator {
    /// Shell command line; `{input}` expands to the input file path.
    command: String,
    /// Root for scratch directories, defaults to the system temp dir.
    scratch_root: Option<PathBuf>,
}

impl BlackBoxEvaluator {
    pub fn new(command: &str, scratch_root: Option<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            scratch_root,
        }
    }

    fn new_scratch_dir(&self) -> Result<PathBuf> {
        let root = self
            .scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let dir = root.join(format!("smartneb-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Runs the command once and returns its stdout.
    fn run_process(&self, input_data: &str) -> Result<String> {
        let scrdir = self.new_scratch_dir()?;
        let input_path = scrdir.join("input.xyz");
        fs::write(&input_path, input_data)?;

        let cmdline = self
            .command
            .replace("{input}", &input_path.display().to_string());
        info!("run evaluator: {}", cmdline);
        debug!("scratch dir: {}", scrdir.display());

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&cmdline)
            .current_dir(&scrdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NebError::Evaluation(format!("failed to spawn {:?}: {}", cmdline, e)))?;

        // Feed stdin from its own thread so a command that answers before it
        // has read everything cannot block on a full stdout pipe.
        let feeder = child.stdin.take().map(|mut stdin| {
            let data = input_data.to_owned();
            thread::spawn(move || match stdin.write_all(data.as_bytes()) {
                // a command that reads the input file instead may close stdin early
                Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            })
        });

        let output = child
            .wait_with_output()
            .map_err(|e| NebError::Evaluation(format!("failed to read evaluator output: {}", e)))?;

        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(NebError::Evaluation(format!("failed to write to stdin: {}", e)))
                }
                Err(_) => return Err(NebError::Evaluation("stdin writer panicked".into())),
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || !stderr.trim().is_empty() {
            // keep the scratch directory alive for debugging
            error!(
                "Job failed.\nPlease check scratch directory:\n {}",
                scrdir.display()
            );
            return Err(NebError::Evaluation(format!(
                "{:?} exited with {}: {}",
                cmdline,
                output.status,
                stderr.trim()
            )));
        }

        if let Err(e) = fs::remove_dir_all(&scrdir) {
            warn!("could not remove scratch dir {}: {}", scrdir.display(), e);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Evaluator for BlackBoxEvaluator {
    fn name(&self) -> &str {
        "black-box (external)"
    }

    fn evaluate(&self, structure: &AtomicStructure) -> Result<ModelProperties> {
        let mut all = self.evaluate_many(std::slice::from_ref(structure))?;
        if all.len() != 1 {
            return Err(NebError::Protocol(format!(
                "expected 1 result block, got {}",
                all.len()
            )));
        }
        Ok(all.remove(0))
    }

    fn evaluate_many(&self, structures: &[AtomicStructure]) -> Result<Vec<ModelProperties>> {
        let input = xyz::format_frames(structures);
        if structures.len() > 1 {
            info!("run in batch mode with {} structures ...", structures.len());
        }
        let output = self.run_process(&input)?;
        protocol::parse_all(&output).map_err(|e| match e {
            NebError::Parse(msg) => NebError::Evaluation(format!("malformed evaluator output: {}", msg)),
            other => other,
        })
    }
}
