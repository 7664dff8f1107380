use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::config::StageConfig;
use common::hardware::{PortLister, SimulatedStage};
use common::{StageError, StageResult, StageSystem};
use threaded_impl::StageRuntime;

struct FixedPorts(Vec<String>);

impl PortLister for FixedPorts {
    fn list(&mut self) -> StageResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

fn runtime(dir: &std::path::Path) -> (StageRuntime, SimulatedStage) {
    let config = StageConfig {
        data_dir: dir.to_path_buf(),
        control_period_ms: 5,
        log_interval_ms: 10,
        discovery_period_ms: 20,
        ..StageConfig::default()
    };
    let stage = SimulatedStage::new(config.axis_count()).with_update_period(Duration::from_millis(2));
    let system = StageSystem::new(config, Box::new(stage.sensor()), Box::new(stage.transport()))
        .unwrap();
    let lister = FixedPorts(vec!["/dev/ttyACM1".into(), "/dev/ttyACM0".into()]);
    (StageRuntime::start(Arc::new(system), Box::new(lister)), stage)
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn discovered_port_is_used_for_connect() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, stage) = runtime(dir.path());

    assert!(wait_for(Duration::from_secs(2), || {
        runtime.system().ports().first().is_some()
    }));
    runtime.connect_blocking(None).unwrap();
    assert_eq!(stage.port().as_deref(), Some("/dev/ttyACM0"));
}

#[test]
fn workers_drive_the_stage_once_connected() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, stage) = runtime(dir.path());
    let system = Arc::clone(runtime.system());

    runtime.connect_blocking(Some("sim".into())).unwrap();
    system.set_targets(&[100.0, 50.0]).unwrap();

    assert!(wait_for(Duration::from_secs(2), || stage.frames().len() >= 10));
    assert!(wait_for(Duration::from_secs(2), || {
        system.status().diagnostics.logger_ticks >= 3
    }));
    assert!(stage.position(0).unwrap() > 0.0);
}

#[test]
fn failed_connect_is_reported_to_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, stage) = runtime(dir.path());
    stage.set_fail_attach(true);

    let err = runtime.connect_blocking(Some("sim".into())).unwrap_err();
    assert!(matches!(err, StageError::Connection(_)));
    assert!(!runtime.system().orchestrator().is_connected());
}

#[test]
fn shutdown_stops_workers_then_disconnects() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runtime, stage) = runtime(dir.path());
    let system = Arc::clone(runtime.system());
    runtime.connect_blocking(Some("sim".into())).unwrap();
    assert!(stage.is_attached());

    runtime.shutdown();
    assert!(!stage.is_attached());
    assert!(!system.orchestrator().is_connected());

    let ticks = system.status().diagnostics.control_ticks;
    thread::sleep(Duration::from_millis(30));
    assert_eq!(system.status().diagnostics.control_ticks, ticks);

    assert!(matches!(
        runtime.connect_blocking(None),
        Err(StageError::WorkerStopped)
    ));
    runtime.shutdown();
}
