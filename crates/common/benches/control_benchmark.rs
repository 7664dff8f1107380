use criterion::{black_box, criterion_group, criterion_main, Criterion};
use common::codec;
use common::config::StageConfig;
use common::hardware::SimulatedStage;
use common::pid::{PidController, PidGains};
use common::{StageSystem, Timeseries};

fn benchmark_pid(c: &mut Criterion) {
    let mut controller = PidController::new(PidGains::new(1.0, 0.1, 0.05, 100.0));

    c.bench_function("pid_compute", |b| {
        b.iter(|| {
            for i in 0..100 {
                let error = black_box(10.0 - (i as f64 * 0.1));
                black_box(controller.compute(error, black_box(0.01)));
            }
        })
    });
}

fn benchmark_codec(c: &mut Criterion) {
    c.bench_function("encode_target", |b| {
        b.iter(|| {
            for value in (-1000i64..1000).step_by(7) {
                black_box(codec::encode(black_box(value)).ok());
            }
        })
    });
}

fn benchmark_engine_tick(c: &mut Criterion) {
    let config = StageConfig::default();
    let stage = SimulatedStage::new(config.axis_count()).with_response(0.0);
    let system = StageSystem::new(config, Box::new(stage.sensor()), Box::new(stage.transport()))
        .expect("simulated stage");
    system.connect(Some("sim")).expect("connect");
    system.set_targets(&[100.0, 50.0]).expect("targets");

    c.bench_function("engine_tick_two_axes", |b| {
        b.iter(|| black_box(system.engine().tick()))
    });
    system.disconnect();
}

fn benchmark_timeseries(c: &mut Criterion) {
    c.bench_function("timeseries_append_1000", |b| {
        b.iter(|| {
            let mut series = Timeseries::new("unused.csv");
            for ms in 0..1000u64 {
                let _ = series.append(black_box(ms), ms as f64);
            }
            black_box(series.len())
        })
    });
}

criterion_group!(
    benches,
    benchmark_pid,
    benchmark_codec,
    benchmark_engine_tick,
    benchmark_timeseries
);
criterion_main!(benches);
