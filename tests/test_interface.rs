use crossbeam_channel::unbounded;

use smartneb::core::config::NebConfig;
use smartneb::interface::state::{AppMode, AppState, WorkerStatus};
use smartneb::solvers::{CycleStats, SchedulerEvent, Stage};

use crate::common::bead;

mod common;

#[test]
fn test_state_follows_scheduler_events() {
    let mut app = AppState::new(NebConfig::default());
    let (tx, rx) = unbounded();
    app.set_channel(rx);
    assert_eq!(app.worker_status, WorkerStatus::Starting);

    tx.send(SchedulerEvent::Stage { cycle: 1, stage: Stage::TsOnly(2) }).unwrap();
    tx.send(SchedulerEvent::Profile {
        energies: vec![-1.0, 0.5, 2.0, 0.0, -1.5],
        ts_index: Some(2),
        fmax: 0.4,
        evaluator_calls: 12,
    })
    .unwrap();
    tx.send(SchedulerEvent::TsImage(bead(2.0))).unwrap();
    tx.send(SchedulerEvent::CycleUpdate(CycleStats {
        cycle: 1,
        ts_index: 2,
        fmax: 0.05,
        evaluator_calls: 20,
        converged: true,
    }))
    .unwrap();
    tx.send(SchedulerEvent::Finished { converged: true }).unwrap();
    app.tick();

    assert_eq!(app.worker_status, WorkerStatus::Finished);
    assert_eq!(app.cycle, 1);
    assert_eq!(app.stage, Some(Stage::TsOnly(2)));
    assert_eq!(app.ts_index, Some(2));
    assert_eq!(app.evaluator_calls, 20);
    assert_eq!(app.converged, Some(true));
    assert!(app.ts_image.is_some());
    assert_eq!(app.telemetry.fmax_history.len(), 1);
    assert_eq!(app.telemetry.cycle_fmax.back(), Some(&(1.0, 0.05)));
    assert_eq!(app.relative_energies(), vec![0.0, 1.5, 3.0, 1.0, -0.5]);

    // sender gone -> channel is released
    drop(tx);
    app.tick();
    assert!(app.rx.is_none());
    assert_eq!(app.worker_status, WorkerStatus::Finished);
}

#[test]
fn test_error_event_is_sticky() {
    let mut app = AppState::new(NebConfig::default());
    let (tx, rx) = unbounded();
    app.set_channel(rx);

    tx.send(SchedulerEvent::Error("evaluator crashed".into())).unwrap();
    drop(tx);
    app.tick();
    app.tick();

    assert_eq!(app.worker_status, WorkerStatus::Error);
    assert_eq!(app.error.as_deref(), Some("evaluator crashed"));
    assert!(app.logs.iter().any(|l| l.contains("evaluator crashed")));
}

#[test]
fn test_keys_switch_tabs_and_walk_images() {
    let mut app = AppState::new(NebConfig::default());
    app.on_key('3');
    assert_eq!(app.mode, AppMode::TsViewer);
    app.on_key('2');
    assert_eq!(app.mode, AppMode::Profile);

    // nothing to select yet
    app.on_key('j');
    assert_eq!(app.profile_state.selected(), None);

    app.handle_event(SchedulerEvent::Profile {
        energies: vec![0.0, 1.0, 0.0],
        ts_index: Some(1),
        fmax: 0.0,
        evaluator_calls: 3,
    });
    // zero fmax (before any relaxation) is not plotted
    assert!(app.telemetry.fmax_history.is_empty());

    app.on_key('k');
    assert_eq!(app.profile_state.selected(), Some(2));
    app.on_key('j');
    assert_eq!(app.profile_state.selected(), Some(0));

    app.on_key('q');
    assert!(app.should_quit);
}
