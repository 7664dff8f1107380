use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_impl::AsyncStageRuntime;
use common::codec;
use common::config::StageConfig;
use common::diagnostics::DiagnosticsSnapshot;
use common::hardware::{PortLister, SimulatedStage};
use common::{load_config, StageResult, StageSystem};
use criterion::{black_box, Criterion};
use threaded_impl::StageRuntime;
use tracing_subscriber::EnvFilter;

struct NoPorts;

impl PortLister for NoPorts {
    fn list(&mut self) -> StageResult<Vec<String>> {
        Ok(Vec::new())
    }
}

struct RunSummary {
    elapsed: Duration,
    diagnostics: DiagnosticsSnapshot,
    /// `|target - feedback|` per axis at the end of the run.
    final_error: Vec<Option<f64>>,
    frames: usize,
}

fn targets_for(config: &StageConfig) -> Vec<f64> {
    (0..config.axis_count()).map(|axis| 500.0 + 250.0 * axis as f64).collect()
}

fn summarise(system: &StageSystem, stage: &SimulatedStage, elapsed: Duration) -> RunSummary {
    let status = system.status();
    RunSummary {
        elapsed,
        diagnostics: status.diagnostics,
        final_error: status
            .axes
            .iter()
            .map(|axis| Some((axis.target? - axis.feedback?).abs()))
            .collect(),
        frames: stage.frames().len(),
    }
}

fn run_threaded(config: StageConfig, duration: Duration) -> Result<RunSummary> {
    let targets = targets_for(&config);
    let (system, stage) = StageSystem::simulated(config)?;
    let mut runtime = StageRuntime::start(Arc::new(system), Box::new(NoPorts));
    let system = Arc::clone(runtime.system());

    runtime.connect_blocking(Some("sim".into()))?;
    system.set_targets(&targets)?;
    let start = Instant::now();
    thread::sleep(duration);
    let summary = summarise(&system, &stage, start.elapsed());
    system.save()?;
    runtime.shutdown();
    Ok(summary)
}

fn run_async(config: StageConfig, duration: Duration) -> Result<RunSummary> {
    let targets = targets_for(&config);
    let (system, stage) = StageSystem::simulated(config)?;
    let tokio = tokio::runtime::Runtime::new().context("starting tokio runtime")?;

    tokio.block_on(async move {
        let mut runtime = AsyncStageRuntime::start(Arc::new(system), Box::new(NoPorts));
        let system = Arc::clone(runtime.system());

        runtime.connect(Some("sim".into())).await?;
        system.set_targets(&targets)?;
        let start = Instant::now();
        tokio::time::sleep(duration).await;
        let summary = summarise(&system, &stage, start.elapsed());
        runtime.save().await?;
        runtime.shutdown().await;
        Ok::<_, anyhow::Error>(summary)
    })
}

fn report(name: &str, config: &StageConfig, summary: &RunSummary) {
    let d = &summary.diagnostics;
    let secs = summary.elapsed.as_secs_f64();
    let expected = secs * 1000.0 / config.control_period_ms as f64;

    println!("\n=== {name} ===");
    println!("Run time: {secs:.2} s");
    println!(
        "Control ticks: {} ({:.1}% of {:.0} scheduled)",
        d.control_ticks,
        d.control_ticks as f64 / expected.max(1.0) * 100.0,
        expected
    );
    println!("Logger ticks: {}", d.logger_ticks);
    println!("Frames sent: {}", summary.frames);
    println!("Skipped axes: {}  Transport errors: {}", d.skipped_axes, d.transport_errors);
    for (axis, error) in summary.final_error.iter().enumerate() {
        match error {
            Some(error) => println!("Axis {axis} final tracking error: {error:.2}"),
            None => println!("Axis {axis} final tracking error: n/a"),
        }
    }
}

fn benchmark_control_tick(c: &mut Criterion, config: &StageConfig) -> Result<()> {
    let (system, stage) = StageSystem::simulated(config.clone())?;
    system.connect(Some("sim"))?;
    system.set_targets(&targets_for(config))?;
    c.bench_function("control_tick", |b| {
        b.iter(|| black_box(system.engine().tick()));
    });
    system.disconnect();
    drop(stage);
    Ok(())
}

fn benchmark_codec(c: &mut Criterion) {
    c.bench_function("encode_decode_target", |b| {
        b.iter(|| {
            for value in (i16::MIN..=i16::MAX).step_by(257) {
                let [b0, b1, b2] = codec::encode_i16(black_box(value));
                black_box(codec::decode(b0, b1, b2));
            }
        });
    });
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: benchmark_runner <config_file> [threaded|async|both] [--secs N] [--criterion]");
        eprintln!("Example: benchmark_runner configs/stage.toml both --secs 5");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let mode = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or("both");
    if !matches!(mode, "threaded" | "async" | "both") {
        bail!("unknown mode '{mode}'");
    }
    let use_criterion = args.iter().any(|a| a == "--criterion");
    let secs: u64 = match args.iter().position(|a| a == "--secs") {
        Some(i) => args
            .get(i + 1)
            .context("--secs needs a value")?
            .parse()
            .context("--secs must be a whole number")?,
        None => 3,
    };

    let mut config = load_config(config_path).with_context(|| format!("loading {config_path}"))?;
    config.data_dir = config.data_dir.join("bench");

    println!("========================================");
    println!("Linear Stage Benchmark");
    println!("========================================");
    println!("Config: {config_path}");
    println!("Control period: {} ms", config.control_period_ms);
    println!("Log interval: {} ms", config.log_interval_ms);
    println!("Mode: {mode}");
    println!("========================================");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(50)
            .measurement_time(Duration::from_secs(5));
        benchmark_control_tick(&mut criterion, &config)?;
        benchmark_codec(&mut criterion);
        criterion.final_summary();
        println!("\nCheck the target/criterion directory for detailed HTML reports.");
        return Ok(());
    }

    let duration = Duration::from_secs(secs);
    if mode == "threaded" || mode == "both" {
        let summary = run_threaded(config.clone(), duration)?;
        report("THREADED", &config, &summary);
    }
    if mode == "async" || mode == "both" {
        let summary = run_async(config.clone(), duration)?;
        report("ASYNC", &config, &summary);
    }

    println!("\n========================================");
    println!("Benchmark complete! Series saved under {}", config.data_dir.display());
    println!("========================================");
    Ok(())
}
