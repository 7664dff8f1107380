use std::sync::Arc;
use std::time::Duration;

use async_impl::AsyncStageRuntime;
use common::config::StageConfig;
use common::hardware::{PortLister, SimulatedStage};
use common::{StageError, StageResult, StageSystem};

struct FixedPorts(Vec<String>);

impl PortLister for FixedPorts {
    fn list(&mut self) -> StageResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

fn runtime(dir: &std::path::Path) -> (AsyncStageRuntime, SimulatedStage) {
    let config = StageConfig {
        data_dir: dir.to_path_buf(),
        control_period_ms: 5,
        log_interval_ms: 10,
        discovery_period_ms: 20,
        ..StageConfig::default()
    };
    let stage =
        SimulatedStage::new(config.axis_count()).with_update_period(Duration::from_millis(2));
    let system = StageSystem::new(config, Box::new(stage.sensor()), Box::new(stage.transport()))
        .unwrap();
    let lister = FixedPorts(vec!["/dev/ttyUSB0".into()]);
    (
        AsyncStageRuntime::start(Arc::new(system), Box::new(lister)),
        stage,
    )
}

async fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    done()
}

#[tokio::test]
async fn control_and_logging_run_after_connect() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runtime, stage) = runtime(dir.path());
    let system = Arc::clone(runtime.system());

    runtime.connect(Some("sim".into())).await.unwrap();
    system.set_targets(&[80.0, 40.0]).unwrap();

    assert!(wait_for(Duration::from_secs(2), || stage.frames().len() >= 10).await);
    assert!(
        wait_for(Duration::from_secs(2), || {
            system.status().diagnostics.logger_ticks >= 3
        })
        .await
    );

    let written = runtime.save().await.unwrap();
    assert_eq!(written.len(), 8);
    assert!(written.iter().all(|p| p.exists()));

    runtime.shutdown().await;
    assert!(!stage.is_attached());
}

#[tokio::test]
async fn discovery_feeds_the_port_registry() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runtime, stage) = runtime(dir.path());

    assert!(
        wait_for(Duration::from_secs(2), || {
            runtime.system().ports().first().is_some()
        })
        .await
    );
    runtime.connect(None).await.unwrap();
    assert_eq!(stage.port().as_deref(), Some("/dev/ttyUSB0"));

    runtime.disconnect().await.unwrap();
    assert!(!runtime.system().orchestrator().is_connected());
    runtime.shutdown().await;
}

#[tokio::test]
async fn requests_after_shutdown_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runtime, stage) = runtime(dir.path());
    stage.set_fail_open(true);

    assert!(matches!(
        runtime.connect(Some("sim".into())).await,
        Err(StageError::Connection(_))
    ));

    runtime.shutdown().await;
    assert!(matches!(
        runtime.connect(None).await,
        Err(StageError::WorkerStopped)
    ));
}
