//! Staged ("smart") NEB relaxation.
//!
//! Instead of relaxing the whole band from the start, each cycle first
//! relaxes symmetric image pairs from the outside in with every other image
//! frozen, then the TS candidate alone with climbing enabled, and only then
//! the full chain. The run is converged when the full-chain NEB force drops
//! below the target.

use crossbeam_channel::Sender;
use log::{info, warn};

use crate::analysis::profile::{locate_ts, EnergyProfile};
use crate::core::chain::{spring_constants, Chain, SpringConstants};
use crate::core::config::NebConfig;
use crate::core::constraints;
use crate::core::domain::AtomicStructure;
use crate::engine::broker::{BatchMode, ForceBroker};
use crate::engine::evaluator::build_evaluator;
use crate::engine::interpolation::Interpolator;
use crate::engine::minimizer::{Fire, MinimizeReport, Minimizer, StopCriteria};
use crate::error::Result;
use crate::io::output;
use crate::solvers::relax::{band_fmax, relax_band};
use crate::solvers::{CycleStats, SchedulerEvent, Stage};

/// Where the initial chain comes from.
#[derive(Debug, Clone)]
pub enum ChainInput {
    /// Interpolate between two endpoints, optionally through a waypoint.
    Endpoints {
        reactant: AtomicStructure,
        product: AtomicStructure,
        waypoint: Option<AtomicStructure>,
    },
    /// A ready-made initial guess (at least 3 frames).
    Images(Vec<AtomicStructure>),
}

/// Result of a scheduler run.
#[derive(Debug)]
pub struct NebOutcome {
    pub chain: Chain,
    pub ts_index: usize,
    pub converged: bool,
    pub cycles: usize,
    pub final_fmax: f64,
    pub evaluator_calls: usize,
    pub profile: EnergyProfile,
}

pub struct SmartNeb {
    config: NebConfig,
    broker: ForceBroker,
    minimizer: Box<dyn Minimizer>,
    tx: Option<Sender<SchedulerEvent>>,
}

impl SmartNeb {
    pub fn new(config: NebConfig, broker: ForceBroker) -> Self {
        let minimizer = Box::new(Fire::new(config.fire.clone()));
        Self {
            config,
            broker,
            minimizer,
            tx: None,
        }
    }

    /// Resolves the configured evaluator and batch mode.
    pub fn from_config(config: NebConfig) -> Result<Self> {
        config.validate()?;
        let mode = if config.batch {
            BatchMode::Batched
        } else {
            BatchMode::Single
        };
        let broker = ForceBroker::new(build_evaluator(&config.evaluator), mode);
        Ok(Self::new(config, broker))
    }

    /// Publishes progress to `tx` while running.
    pub fn with_events(mut self, tx: Sender<SchedulerEvent>) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn with_minimizer(mut self, minimizer: Box<dyn Minimizer>) -> Self {
        self.minimizer = minimizer;
        self
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    fn enter(&self, cycle: usize, stage: Stage) {
        info!("cycle {}: {}", cycle, stage);
        self.emit(SchedulerEvent::Stage { cycle, stage });
    }

    /// Runs the whole workflow: BUILD, LOCATE_TS, the relaxation cycles and
    /// persistence of the results.
    pub fn run(mut self, input: ChainInput) -> Result<NebOutcome> {
        info!(
            "evaluator: {} ({:?} mode)",
            self.broker.evaluator_name(),
            self.broker.mode()
        );

        // 1. build and evaluate the initial chain
        self.enter(0, Stage::Build);
        let mut chain = self.build_chain(input)?;
        let springs = if self.config.keep_image_distance {
            spring_constants(&chain)?
        } else {
            SpringConstants::uniform()
        };

        // 2. locate the transition-state candidate
        self.enter(0, Stage::LocateTs);
        let mut m = locate_ts(&chain.energies())?;
        info!("TS candidate: image {}", m);
        self.publish_profile(&chain, 0.0);

        // 3. staged relaxation cycles
        let mut converged = false;
        let mut cycles = 0;
        let mut final_fmax = f64::NAN;
        for cycle in 1..=self.config.max_cycles {
            cycles = cycle;

            for group in pairwise_groups(m, chain.len()) {
                self.enter(cycle, Stage::Pairwise(group.clone()));
                constraints::freeze_all_except(&mut chain, &group);
                let criteria = StopCriteria {
                    fmax: self.config.pairwise.fmax,
                    max_steps: self.config.pairwise.max_steps,
                };
                let report = self.relax(&mut chain, &springs, None, criteria)?;
                self.publish_profile(&chain, report.fmax);
            }

            if chain.is_endpoint(m) {
                warn!("TS candidate {} is an endpoint; skipping TS-only stage", m);
            } else {
                self.enter(cycle, Stage::TsOnly(m));
                constraints::freeze_all_except(&mut chain, &[m]);
                let criteria = StopCriteria {
                    fmax: self.config.ts_only.fmax,
                    max_steps: self.config.ts_only.max_steps,
                };
                let report = self.relax(&mut chain, &springs, Some(m), criteria)?;
                self.publish_profile(&chain, report.fmax);
            }
            m = locate_ts(&chain.energies())?;

            self.enter(cycle, Stage::Full);
            constraints::unfreeze_all(&mut chain);
            let climbing = interior(&chain, m);
            let criteria = StopCriteria {
                fmax: self.config.fmax,
                max_steps: self.config.full_max_steps,
            };
            let report = self.relax(&mut chain, &springs, climbing, criteria)?;
            self.publish_profile(&chain, report.fmax);

            self.enter(cycle, Stage::Check);
            // the full relaxation may move the maximum
            m = locate_ts(&chain.energies())?;
            let climbing = interior(&chain, m);
            final_fmax = band_fmax(&mut chain, &mut self.broker, &springs, climbing)?;
            converged = final_fmax < self.config.fmax;
            info!(
                "cycle {}: fmax = {:.5} (target {}), evaluator calls = {}",
                cycle,
                final_fmax,
                self.config.fmax,
                self.broker.calls()
            );
            self.emit(SchedulerEvent::TsImage(chain.image(m).structure.clone()));
            self.emit(SchedulerEvent::CycleUpdate(CycleStats {
                cycle,
                ts_index: m,
                fmax: final_fmax,
                evaluator_calls: self.broker.calls(),
                converged,
            }));
            if converged {
                break;
            }
        }

        // 4. terminal state
        let profile = EnergyProfile::from_chain(&chain)?;
        let ts_index = profile.ts_index;
        if converged {
            self.enter(cycles, Stage::Done);
            info!("NEB converged after {} cycles", cycles);
        } else {
            self.enter(cycles, Stage::Failed);
            warn!(
                "NEB not converged within {} cycles (fmax = {:.5})",
                self.config.max_cycles, final_fmax
            );
        }
        info!("total number of energy calls: {}", self.broker.calls());
        info!("per-image evaluations: {:?}", chain.evaluation_counts());

        let outcome = NebOutcome {
            chain,
            ts_index,
            converged,
            cycles,
            final_fmax,
            evaluator_calls: self.broker.calls(),
            profile,
        };
        if let Some(dir) = &self.config.output_dir {
            output::persist(dir, &outcome)?;
        }
        self.emit(SchedulerEvent::Finished { converged });
        Ok(outcome)
    }

    /// BUILD: interpolate (or adopt) the chain, evaluate it, optionally
    /// re-interpolate an interpolated chain through its highest-energy image,
    /// and apply the permanently fixed atoms.
    pub fn build_chain(&mut self, input: ChainInput) -> Result<Chain> {
        let interpolator = Interpolator::new(self.config.interpolation.clone(), self.config.fire.clone());
        let nimages = self.config.nimages;

        // only freshly interpolated chains are re-interpolated
        let (mut chain, may_refine) = match input {
            ChainInput::Endpoints {
                reactant,
                product,
                waypoint: Some(w),
            } => (
                interpolator.interpolate_with_waypoint(&reactant, &w, &product, nimages)?,
                false,
            ),
            ChainInput::Endpoints {
                reactant,
                product,
                waypoint: None,
            } => (interpolator.interpolate(&reactant, &product, nimages)?, true),
            ChainInput::Images(frames) => {
                info!("using {} input frames as initial chain", frames.len());
                (Chain::new(frames)?, false)
            }
        };
        self.broker.evaluate_chain(&mut chain)?;

        if self.config.refine_through_waypoint && may_refine {
            let m = locate_ts(&chain.energies())?;
            if chain.is_endpoint(m) {
                warn!("highest-energy image {} is an endpoint; skipping refinement", m);
            } else {
                info!("re-interpolating through image {}", m);
                let n = chain.len();
                let refined = interpolator.interpolate_with_waypoint(
                    &chain.image(0).structure,
                    &chain.image(m).structure,
                    &chain.image(n - 1).structure,
                    n,
                )?;
                for i in chain.interior() {
                    let positions = refined.image(i).structure.positions();
                    chain.image_mut(i).structure.set_positions(&positions)?;
                }
                let movable = chain.interior();
                self.broker.refresh(&mut chain, movable)?;
            }
        }

        constraints::pin_atoms(&mut chain, &self.config.fixed_atoms)?;
        if let Some(dir) = &self.config.output_dir {
            output::write_stage0(dir, &chain)?;
        }
        Ok(chain)
    }

    fn relax(
        &mut self,
        chain: &mut Chain,
        springs: &SpringConstants,
        climbing: Option<usize>,
        criteria: StopCriteria,
    ) -> Result<MinimizeReport> {
        let report = relax_band(
            chain,
            &mut self.broker,
            self.minimizer.as_mut(),
            springs,
            climbing,
            criteria,
        )?;
        info!(
            "  {} steps, fmax = {:.5}, converged = {}",
            report.steps, report.fmax, report.converged
        );
        Ok(report)
    }

    fn publish_profile(&self, chain: &Chain, fmax: f64) {
        let energies = chain.energies();
        let ts_index = locate_ts(&energies).ok();
        self.emit(SchedulerEvent::Profile {
            energies,
            ts_index,
            fmax,
            evaluator_calls: self.broker.calls(),
        });
    }
}

fn interior(chain: &Chain, m: usize) -> Option<usize> {
    (!chain.is_endpoint(m)).then_some(m)
}

/// Image groups relaxed in the PAIRWISE stage for TS candidate `m` in a
/// chain of `n` images.
///
/// For k = 1..m-1 the group is (k, n-1-k). A group collapses to one image
/// when both indices coincide; `m` itself, endpoints, and images already
/// relaxed earlier in the same stage are left out. Empty groups are dropped.
pub fn pairwise_groups(m: usize, n: usize) -> Vec<Vec<usize>> {
    let mut seen = vec![false; n];
    let mut groups = Vec::new();
    for k in 1..m.min(n) {
        let mut group = Vec::with_capacity(2);
        for idx in [k, n - 1 - k] {
            if idx == 0 || idx + 1 >= n || idx == m || seen[idx] || group.contains(&idx) {
                continue;
            }
            group.push(idx);
        }
        for &idx in &group {
            seen[idx] = true;
        }
        if !group.is_empty() {
            groups.push(group);
        }
    }
    groups
}
