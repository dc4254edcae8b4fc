use std::fmt;

use crate::core::domain::AtomicStructure;

/// Scheduler states, in the order a run visits them.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Build,
    LocateTs,
    /// Relaxing one symmetric pair (or a single leftover image).
    Pairwise(Vec<usize>),
    /// Climbing relaxation of the TS candidate alone.
    TsOnly(usize),
    Full,
    Check,
    Done,
    /// Cycle budget exhausted without convergence.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Build => write!(f, "BUILD"),
            Stage::LocateTs => write!(f, "LOCATE_TS"),
            Stage::Pairwise(images) => write!(f, "PAIRWISE {:?}", images),
            Stage::TsOnly(m) => write!(f, "TS_ONLY [{}]", m),
            Stage::Full => write!(f, "FULL"),
            Stage::Check => write!(f, "CHECK"),
            Stage::Done => write!(f, "DONE"),
            Stage::Failed => write!(f, "FAILED"),
        }
    }
}

/// Statistics at the end of one scheduler cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub cycle: usize,
    pub ts_index: usize,
    /// Full-chain max per-atom NEB force after the FULL stage.
    pub fmax: f64,
    pub evaluator_calls: usize,
    pub converged: bool,
}

/// Events emitted by the scheduler to the main thread.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Diagnostic log message.
    Log(String),

    /// The scheduler entered a new stage. `cycle` is 0 outside the cycle loop.
    Stage { cycle: usize, stage: Stage },

    /// Energies after a relaxation sub-step.
    Profile {
        energies: Vec<f64>,
        ts_index: Option<usize>,
        /// Max force on the images relaxed in the sub-step.
        fmax: f64,
        evaluator_calls: usize,
    },

    /// Current geometry of the TS candidate.
    TsImage(AtomicStructure),

    CycleUpdate(CycleStats),

    /// Scheduler has finished its run.
    Finished { converged: bool },

    /// The run aborted with an error.
    Error(String),
}

pub mod relax;
pub mod smart_neb;
