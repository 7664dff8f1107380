mod menu;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_impl::AsyncStageRuntime;
use common::config::{Backend, RuntimeMode};
use common::hardware::{PortLister, SerialPortLister};
use common::{load_config, StageConfig, StageResult, StageSystem};
use threaded_impl::StageRuntime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use menu::Command;

const DEFAULT_CONFIG: &str = "configs/stage.toml";

/// Runtime chosen by `mode`; both expose the same blocking surface to the
/// console.
enum Runner {
    Threaded(StageRuntime),
    Async {
        tokio: tokio::runtime::Runtime,
        runtime: AsyncStageRuntime,
    },
}

impl Runner {
    fn start(mode: RuntimeMode, system: Arc<StageSystem>, lister: Box<dyn PortLister>) -> Result<Self> {
        Ok(match mode {
            RuntimeMode::Threaded => Runner::Threaded(StageRuntime::start(system, lister)),
            RuntimeMode::Async => {
                let tokio = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
                let runtime = {
                    let _guard = tokio.enter();
                    AsyncStageRuntime::start(system, lister)
                };
                Runner::Async { tokio, runtime }
            }
        })
    }

    fn system(&self) -> &Arc<StageSystem> {
        match self {
            Runner::Threaded(runtime) => runtime.system(),
            Runner::Async { runtime, .. } => runtime.system(),
        }
    }

    fn connect(&self, port: Option<String>) -> StageResult<()> {
        match self {
            Runner::Threaded(runtime) => runtime.connect_blocking(port),
            Runner::Async { tokio, runtime } => tokio.block_on(runtime.connect(port)),
        }
    }

    fn disconnect(&self) -> StageResult<()> {
        match self {
            Runner::Threaded(runtime) => runtime.disconnect_blocking(),
            Runner::Async { tokio, runtime } => tokio.block_on(runtime.disconnect()),
        }
    }

    fn save(&self) -> StageResult<Vec<PathBuf>> {
        match self {
            Runner::Threaded(runtime) => runtime.system().save(),
            Runner::Async { tokio, runtime } => tokio.block_on(runtime.save()),
        }
    }

    fn shutdown(self) {
        match self {
            Runner::Threaded(mut runtime) => runtime.shutdown(),
            Runner::Async { tokio, mut runtime } => tokio.block_on(runtime.shutdown()),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = load_or_default(Path::new(&config_path))?;
    let mode = config.mode;
    info!(config = %config_path, ?mode, backend = ?config.backend, "starting stage console");

    let lister: Box<dyn PortLister> = match config.backend {
        Backend::Simulated => Box::new(NoPorts),
        Backend::Jrk | Backend::Serial => Box::new(SerialPortLister),
    };
    let system = Arc::new(StageSystem::from_config(config).context("building stage")?);
    let runner = Runner::start(mode, system, lister)?;

    menu::show_menu();
    let result = console(&runner);
    runner.shutdown();
    result
}

fn load_or_default(path: &Path) -> Result<StageConfig> {
    if path.exists() {
        load_config(path).with_context(|| format!("loading {}", path.display()))
    } else {
        warn!(path = %path.display(), "config not found, using defaults");
        Ok(StageConfig::default())
    }
}

fn console(runner: &Runner) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        menu::prompt()?;
        let Some(line) = menu::read_line(&mut input)? else {
            return Ok(());
        };
        match menu::parse_command(&line) {
            Ok(Command::Quit) => return Ok(()),
            Ok(command) => {
                if let Err(err) = execute(runner, command) {
                    println!("error: {err}");
                }
            }
            Err(err) => println!("{err:#}"),
        }
    }
}

fn execute(runner: &Runner, command: Command) -> StageResult<()> {
    let system = runner.system();
    match command {
        Command::Connect(port) => {
            runner.connect(port)?;
            println!("connected");
        }
        Command::Disconnect => {
            runner.disconnect()?;
            println!("disconnected");
        }
        Command::Gains {
            axis,
            kp,
            ki,
            kd,
            i_lim,
        } => system.set_pid_params(axis, kp, ki, kd, i_lim)?,
        Command::Targets(targets) => system.set_targets(&targets)?,
        Command::Disable(axis) => system.disable_axis(axis)?,
        Command::Feedback(axis) => {
            println!("axis {axis} scaled feedback: {}", system.scaled_feedback(axis)?);
        }
        Command::FileName(name) => system.set_file_name(&name)?,
        Command::Save => {
            for path in runner.save()? {
                println!("wrote {}", path.display());
            }
        }
        Command::Clear => system.clear(),
        Command::Interval(ms) => system.set_log_interval(Duration::from_millis(ms))?,
        Command::Status => menu::print_status(&system.status()),
        Command::Help => menu::show_menu(),
        Command::Quit => {}
    }
    Ok(())
}

/// The simulated stage is not behind a serial port.
struct NoPorts;

impl PortLister for NoPorts {
    fn list(&mut self) -> StageResult<Vec<String>> {
        Ok(Vec::new())
    }
}
