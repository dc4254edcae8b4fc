use std::collections::VecDeque;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use ratatui::widgets::TableState;

use crate::core::config::NebConfig;
use crate::core::domain::AtomicStructure;
use crate::solvers::{CycleStats, SchedulerEvent, Stage};

// --- Constants ---
const HISTORY_CAPACITY: usize = 1000;
const LOG_CAPACITY: usize = 200;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Dashboard,
    Profile,
    TsViewer,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Starting,
    Running,
    Finished,
    Error,
}

// --- Telemetry ---

#[derive(Debug, Clone)]
pub struct Telemetry {
    /// (sub-step, fmax) after every relaxation sub-step.
    pub fmax_history: VecDeque<(f64, f64)>,
    /// (cycle, full-chain fmax) after every CHECK stage.
    pub cycle_fmax: VecDeque<(f64, f64)>,
    substeps: usize,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            fmax_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            cycle_fmax: VecDeque::with_capacity(HISTORY_CAPACITY),
            substeps: 0,
        }
    }

    pub fn ingest_fmax(&mut self, fmax: f64) {
        if !fmax.is_finite() {
            return;
        }
        if self.fmax_history.len() >= HISTORY_CAPACITY {
            self.fmax_history.pop_front();
        }
        self.substeps += 1;
        self.fmax_history.push_back((self.substeps as f64, fmax));
    }

    pub fn ingest_cycle(&mut self, stats: &CycleStats) {
        if self.cycle_fmax.len() >= HISTORY_CAPACITY {
            self.cycle_fmax.pop_front();
        }
        self.cycle_fmax.push_back((stats.cycle as f64, stats.fmax));
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Visualization State for the TS viewer
#[derive(Debug, Clone)]
pub struct Viewport {
    pub azimuth: f64,
    pub elevation: f64,
    pub zoom: f64,
    pub auto_rotate: bool,
    pub last_tick: Instant,
}

impl Viewport {
    pub fn new() -> Self {
        Self {
            azimuth: 0.0,
            elevation: 0.3,
            zoom: 1.0,
            auto_rotate: true,
            last_tick: Instant::now(),
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        if self.auto_rotate {
            let dt = now.duration_since(self.last_tick).as_secs_f64();
            self.azimuth += 0.5 * dt; // rad/s
        }
        self.last_tick = now;
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

// --- The Master State ---

pub struct AppState {
    // System
    pub should_quit: bool,
    pub mode: AppMode,
    pub config: NebConfig,

    // Worker
    pub rx: Option<Receiver<SchedulerEvent>>,
    pub worker_status: WorkerStatus,
    pub start_time: Instant,

    // Scheduler progress
    pub cycle: usize,
    pub stage: Option<Stage>,
    pub energies: Vec<f64>,
    pub ts_index: Option<usize>,
    pub evaluator_calls: usize,
    pub last_cycle: Option<CycleStats>,
    pub converged: Option<bool>,
    pub ts_image: Option<AtomicStructure>,
    pub error: Option<String>,

    // Analytics
    pub telemetry: Telemetry,
    /// Stage transitions and scheduler messages.
    pub logs: VecDeque<String>,

    // UI Elements
    pub profile_state: TableState,
    pub viewport: Viewport,
}

impl AppState {
    pub fn new(config: NebConfig) -> Self {
        Self {
            should_quit: false,
            mode: AppMode::Dashboard,
            config,
            rx: None,
            worker_status: WorkerStatus::Idle,
            start_time: Instant::now(),
            cycle: 0,
            stage: None,
            energies: Vec::new(),
            ts_index: None,
            evaluator_calls: 0,
            last_cycle: None,
            converged: None,
            ts_image: None,
            error: None,
            telemetry: Telemetry::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            profile_state: TableState::default(),
            viewport: Viewport::new(),
        }
    }

    pub fn set_channel(&mut self, rx: Receiver<SchedulerEvent>) {
        self.rx = Some(rx);
        self.worker_status = WorkerStatus::Starting;
        self.start_time = Instant::now();
    }

    pub fn tick(&mut self) {
        self.viewport.tick();

        if let Some(rx) = self.rx.clone() {
            for _ in 0..100 {
                match rx.try_recv() {
                    Ok(evt) => self.handle_event(evt),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.worker_status != WorkerStatus::Error {
                            self.worker_status = WorkerStatus::Finished;
                        }
                        self.log("Worker disconnected.");
                        self.rx = None;
                        break;
                    }
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Log(msg) => self.log(msg),

            SchedulerEvent::Stage { cycle, stage } => {
                self.worker_status = WorkerStatus::Running;
                self.cycle = cycle;
                self.log(format!("[cycle {}] {}", cycle, stage));
                self.stage = Some(stage);
            }

            SchedulerEvent::Profile {
                energies,
                ts_index,
                fmax,
                evaluator_calls,
            } => {
                self.energies = energies;
                self.ts_index = ts_index;
                self.evaluator_calls = evaluator_calls;
                if fmax > 0.0 {
                    self.telemetry.ingest_fmax(fmax);
                }
            }

            SchedulerEvent::TsImage(structure) => self.ts_image = Some(structure),

            SchedulerEvent::CycleUpdate(stats) => {
                self.telemetry.ingest_cycle(&stats);
                self.evaluator_calls = stats.evaluator_calls;
                self.log(format!(
                    "cycle {} done: fmax = {:.5}, TS = image {}",
                    stats.cycle, stats.fmax, stats.ts_index
                ));
                self.last_cycle = Some(stats);
            }

            SchedulerEvent::Finished { converged } => {
                self.worker_status = WorkerStatus::Finished;
                self.converged = Some(converged);
                if converged {
                    self.log(">>> NEB converged.");
                } else {
                    self.log("NEB not converged within the cycle budget.");
                }
            }

            SchedulerEvent::Error(msg) => {
                self.worker_status = WorkerStatus::Error;
                self.log(format!("Run failed: {}", msg));
                self.error = Some(msg);
            }
        }
    }

    /// Energies relative to the first image, NaN where undefined.
    pub fn relative_energies(&self) -> Vec<f64> {
        let e0 = self.energies.first().copied().unwrap_or(f64::NAN);
        self.energies.iter().map(|e| e - e0).collect()
    }

    /// Logs a message to the internal buffer.
    fn log(&mut self, msg: impl Into<String>) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(msg.into());
    }

    // --- Input Handling ---

    pub fn on_key(&mut self, key: char) {
        match key {
            'q' => self.should_quit = true,
            '1' => self.mode = AppMode::Dashboard,
            '2' => self.mode = AppMode::Profile,
            '3' => self.mode = AppMode::TsViewer,
            '4' => self.mode = AppMode::Config,
            'a' => self.viewport.auto_rotate = !self.viewport.auto_rotate,
            'r' => self.viewport.azimuth = 0.0,
            '+' => self.viewport.zoom = (self.viewport.zoom * 1.2).min(10.0),
            '-' => self.viewport.zoom = (self.viewport.zoom / 1.2).max(0.1),
            'j' => self.select_next_image(),
            'k' => self.select_prev_image(),
            _ => {}
        }
    }

    fn select_next_image(&mut self) {
        if self.energies.is_empty() {
            return;
        }
        let i = match self.profile_state.selected() {
            Some(i) if i + 1 < self.energies.len() => i + 1,
            _ => 0,
        };
        self.profile_state.select(Some(i));
    }

    fn select_prev_image(&mut self) {
        if self.energies.is_empty() {
            return;
        }
        let i = match self.profile_state.selected() {
            Some(0) | None => self.energies.len() - 1,
            Some(i) => i - 1,
        };
        self.profile_state.select(Some(i));
    }
}
