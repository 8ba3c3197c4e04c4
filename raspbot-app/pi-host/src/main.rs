mod sim;

use core::cell::RefCell;
use std::{
    io::BufRead,
    ops::ControlFlow,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_time::{Delay, Duration, Timer};
use embedded_hal::i2c::{Error as _, ErrorKind, ErrorType, I2c, Operation};
use raspbot_core::{
    mk_static,
    utils::{
        controllers::{DriveCommand, ModeCommand, SystemCommand, COMMAND_CHANNEL},
        AvoidanceConfig, SystemClock, SystemController,
    },
};
use serde::Deserialize;
use static_cell::StaticCell;
use tracing::{error, info, warn};

use crate::sim::SimBus;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// I2C bus number of the expansion board
    #[clap(long, default_value_t = 1)]
    bus: u8,
    /// drive a simulated board instead of the I2C bus
    #[clap(long)]
    sim: bool,
    /// JSON file with controller tuning
    #[clap(long)]
    config: Option<PathBuf>,
    /// driving loop period in milliseconds
    #[clap(long, default_value_t = 50)]
    tick_ms: u64,
    /// start in obstacle-avoidance mode
    #[clap(long)]
    autonomous: bool,
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RobotConfig {
    avoidance: AvoidanceConfig,
    /// Manual drive speed at startup.
    speed: Option<i32>,
}

/// Either the Raspberry Pi I2C peripheral or the simulated board.
enum HostBus {
    Pi(rppal::i2c::I2c),
    Sim(SimBus),
}

impl ErrorType for HostBus {
    type Error = ErrorKind;
}

impl I2c for HostBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        match self {
            HostBus::Pi(i2c) => i2c
                .transaction(address, operations)
                .map_err(|e| e.kind()),
            HostBus::Sim(sim) => sim.transaction(address, operations),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RobotConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(RobotConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let cfg: RobotConfig = serde_json::from_str(&text)?;
    info!(?path, ?cfg, "loaded config");
    Ok(cfg)
}

fn open_bus(opts: &Opts) -> Result<HostBus, Box<dyn std::error::Error>> {
    if opts.sim {
        info!("using simulated board");
        return Ok(HostBus::Sim(SimBus::new()));
    }
    let i2c = rppal::i2c::I2c::with_bus(opts.bus)?;
    info!(bus = opts.bus, "opened I2C bus");
    Ok(HostBus::Pi(i2c))
}

/// Set on Ctrl-C or once stdin closes; the driving loop then parks the rover
/// and exits.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Feed JSON `SystemCommand` lines from stdin into the command channel.
fn spawn_stdin_reader() {
    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SystemCommand>(&line) {
                Ok(cmd) => {
                    if COMMAND_CHANNEL.try_send(cmd).is_err() {
                        warn!("command queue full, dropping {:?}", cmd);
                    }
                }
                Err(error) => error!(?error, "error deserializing SystemCommand"),
            }
        }
        SHUTDOWN.store(true, Ordering::Relaxed);
    });
}

/// Raise `SHUTDOWN` on Ctrl-C so the board is not left driving.
fn spawn_interrupt_watcher() {
    std::thread::spawn(|| {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(error) => {
                error!(?error, "failed to start signal runtime");
                return;
            }
        };
        match rt.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                info!("interrupt received");
                SHUTDOWN.store(true, Ordering::Relaxed);
            }
            Err(error) => error!(?error, "failed to listen for Ctrl-C"),
        }
    });
}

/// One pass of the driving loop. Breaks after parking the rover once
/// `shutdown` is raised.
fn drive_once(
    ctrl: &mut SystemController<'_, HostBus, Delay, SystemClock>,
    shutdown: &AtomicBool,
) -> ControlFlow<()> {
    ctrl.drain_commands();
    if shutdown.load(Ordering::Relaxed) {
        info!("shutting down");
        ctrl.shutdown();
        return ControlFlow::Break(());
    }
    ctrl.tick();
    ControlFlow::Continue(())
}

#[embassy_executor::task]
async fn main_task(
    ctrl: &'static mut SystemController<'static, HostBus, Delay, SystemClock>,
    tick: Duration,
) {
    loop {
        if drive_once(ctrl, &SHUTDOWN).is_break() {
            std::process::exit(0);
        }
        Timer::after(tick).await;
    }
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let cfg = load_config(opts.config.as_ref())?;
    let bus = open_bus(&opts)?;
    let i2c_bus = mk_static!(RefCell<HostBus>, RefCell::new(bus));

    let ctrl = SystemController::new(i2c_bus, Delay, SystemClock, cfg.avoidance)
        .map_err(|e| format!("invalid avoidance config: {}", e))?;
    let ctrl = mk_static!(SystemController<'static, HostBus, Delay, SystemClock>, ctrl);

    if let Some(speed) = cfg.speed {
        let _ = ctrl.dispatch(SystemCommand::D(DriveCommand::SetSpeed { s: speed }));
    }
    if opts.autonomous {
        let _ = ctrl.dispatch(SystemCommand::M(ModeCommand::Autonomous));
    }
    spawn_interrupt_watcher();
    if opts.sim {
        spawn_stdin_reader();
    }

    info!(tick_ms = opts.tick_ms, "driving loop running");
    let tick = Duration::from_millis(opts.tick_ms);
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner: Spawner| {
        if let Err(e) = spawner.spawn(main_task(ctrl, tick)) {
            error!(?e, "failed to spawn driving loop");
        }
    })
}
