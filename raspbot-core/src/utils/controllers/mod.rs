//! Module Exports
//!
//! This file exports the hardware controllers of the rover and the
//! `SystemController` that arbitrates between them.
//!
//! - `i2c`: register protocol of the expansion board
//! - `motion`: wheel maneuvers and the distance sensor
//! - `leds`: light bar
//! - `ir`: IR remote receiver and key mapping

pub mod i2c;
pub mod ir;
pub mod leds;
pub mod motion;

use core::cell::RefCell;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant};
use embedded_hal::{delay::DelayNs, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;
use serde::{Deserialize, Serialize};

pub use i2c::{DeviceError, RegisterBus};
pub use ir::{IrReceiver, RemoteKey};
pub use leds::{LEDCommand, LightBar, LightColor};
pub use motion::{DistanceSample, DriveTrain, Maneuver, MotionDriver};

use crate::utils::{
    autonomy::avoidance::{AvoidanceConfig, ConfigError, ObstacleAvoidance},
    clock::Clock,
};

/// Minimum spacing between two accepted remote key presses.
pub const KEY_DEBOUNCE: Duration = Duration::from_millis(150);

/// Channel used to receive commands from outside the driving loop
/// (`SystemCommand` messages).
pub static COMMAND_CHANNEL: Channel<CriticalSectionRawMutex, SystemCommand, 16> = Channel::new();

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "ct", rename_all = "snake_case")] // ct = command type
pub enum SystemCommand {
    D(DriveCommand),
    L(LEDCommand),
    M(ModeCommand),
}

/// Manual drive commands.
///
/// Serialized as JSON with tag `"dc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "dc", rename_all = "snake_case")]
pub enum DriveCommand {
    Advance,
    Reverse,
    SlideLeft,
    SlideRight,
    RotateLeft,
    RotateRight,
    Stop,
    /// Absolute speed, clamped by the driver.
    SetSpeed { s: i32 },
    /// Relative speed change.
    ChangeSpeed { d: i32 },
}

impl DriveCommand {
    pub fn apply<T: DriveTrain>(
        self,
        drive: &mut T,
    ) {
        match self {
            DriveCommand::Advance => drive.advance(),
            DriveCommand::Reverse => drive.reverse(),
            DriveCommand::SlideLeft => drive.slide_left(),
            DriveCommand::SlideRight => drive.slide_right(),
            DriveCommand::RotateLeft => drive.rotate_left(),
            DriveCommand::RotateRight => drive.rotate_right(),
            DriveCommand::Stop => drive.stop(),
            DriveCommand::SetSpeed { s } => drive.set_speed(s),
            DriveCommand::ChangeSpeed { d } => drive.change_speed(d),
        }
    }
}

/// Serialized as JSON with tag `"mc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "mc", rename_all = "snake_case")]
pub enum ModeCommand {
    Manual,
    Autonomous,
}

/// Who is allowed to command the motors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    #[default]
    Manual,
    Autonomous,
}

/// Reasons a command was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Manual drive commands are locked out while the controller drives.
    AutonomousActive(DriveCommand),
}

type Driver<'a, B, D> = MotionDriver<RefCellDevice<'a, B>, D>;

/// Owns every device on the shared bus and the drive-mode flag.
///
/// The bus lives in a single `RefCell`; each device talks through its own
/// `RefCellDevice` handle, so only one transfer can be in flight at a time.
pub struct SystemController<'a, B: 'a, D, C> {
    avoidance: ObstacleAvoidance<Driver<'a, B, D>, C>,
    lights: LightBar<RefCellDevice<'a, B>>,
    ir: IrReceiver<RefCellDevice<'a, B>>,
    clock: C,
    mode: DriveMode,
    last_key_at: Option<Instant>,
}

impl<'a, B, D, C, E> SystemController<'a, B, D, C>
where
    B: I2c<Error = E> + 'a,
    D: DelayNs,
    C: Clock + Clone,
    E: core::fmt::Debug,
{
    /// Build all devices on `i2c_bus` and put the rover in a known state:
    /// motors stopped, lights off, IR receiver listening.
    ///
    /// A board that does not answer is logged and the bus is scanned; the
    /// controller is still returned so the loop can keep running.
    pub fn new(
        i2c_bus: &'a RefCell<B>,
        delay: D,
        clock: C,
        config: AvoidanceConfig,
    ) -> Result<Self, ConfigError> {
        let mut probe = RegisterBus::new(RefCellDevice::new(i2c_bus));
        if !probe.probe() {
            tracing::warn!(
                "no answer from board at 0x{:02X}, scanning bus",
                probe.address()
            );
            i2c::scan_bus(&mut probe.release());
        }

        let driver = MotionDriver::new(RegisterBus::new(RefCellDevice::new(i2c_bus)), delay);
        let avoidance = ObstacleAvoidance::new(driver, clock.clone(), config)?;
        let mut ctrl = SystemController {
            avoidance,
            lights: LightBar::new(RegisterBus::new(RefCellDevice::new(i2c_bus))),
            ir: IrReceiver::new(RegisterBus::new(RefCellDevice::new(i2c_bus))),
            clock,
            mode: DriveMode::Manual,
            last_key_at: None,
        };

        ctrl.avoidance.stop();
        ctrl.lights.ex_command(LEDCommand::Off);
        if let Err(e) = ctrl.ir.enable() {
            tracing::error!(?e, "failed to enable IR receiver");
        }
        Ok(ctrl)
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn avoidance(&self) -> &ObstacleAvoidance<Driver<'a, B, D>, C> {
        &self.avoidance
    }

    pub fn lights(&self) -> &LightBar<RefCellDevice<'a, B>> {
        &self.lights
    }

    /// Execute one command under the drive-mode rules.
    pub fn dispatch(
        &mut self,
        cmd: SystemCommand,
    ) -> Result<(), DispatchError> {
        tracing::debug!(?cmd, mode = ?self.mode, "dispatch");
        match cmd {
            SystemCommand::L(led) => self.lights.ex_command(led),
            SystemCommand::M(ModeCommand::Autonomous) => {
                if self.mode == DriveMode::Manual {
                    self.avoidance.start();
                    self.mode = DriveMode::Autonomous;
                    tracing::info!("autonomous mode");
                }
            }
            SystemCommand::M(ModeCommand::Manual) => self.enter_manual(),
            SystemCommand::D(DriveCommand::Stop) if self.mode == DriveMode::Autonomous => {
                self.enter_manual()
            }
            SystemCommand::D(drive) => match self.avoidance.manual() {
                Some(driver) => drive.apply(driver),
                None => {
                    tracing::warn!(?drive, "drive command ignored in autonomous mode");
                    return Err(DispatchError::AutonomousActive(drive));
                }
            },
        }
        Ok(())
    }

    fn enter_manual(&mut self) {
        self.avoidance.stop();
        if self.mode != DriveMode::Manual {
            self.mode = DriveMode::Manual;
            tracing::info!("manual mode");
        }
    }

    /// Read the remote once and dispatch a debounced key press.
    ///
    /// Returns the key that was acted on.
    pub fn poll_remote(&mut self) -> Option<RemoteKey> {
        let key = self.ir.read_key()?;
        let now = self.clock.now();
        if let Some(last) = self.last_key_at {
            if now.saturating_duration_since(last) < KEY_DEBOUNCE {
                return None;
            }
        }
        let cmd = key.command()?;
        self.last_key_at = Some(now);
        tracing::info!(?key, "remote key");
        // rejection is already logged
        let _ = self.dispatch(cmd);
        Some(key)
    }

    /// Dispatch every command queued on `COMMAND_CHANNEL`.
    pub fn drain_commands(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(cmd) = COMMAND_CHANNEL.try_receive() {
            tracing::info!(?cmd, "received command");
            // rejection is already logged
            let _ = self.dispatch(cmd);
            handled += 1;
        }
        handled
    }

    /// One pass of the driving loop.
    pub fn tick(&mut self) {
        self.poll_remote();
        if self.mode == DriveMode::Autonomous {
            self.avoidance.step();
        }
    }

    /// Leave the rover stopped, dark and deaf.
    pub fn shutdown(&mut self) {
        self.enter_manual();
        self.lights.ex_command(LEDCommand::Off);
        if let Err(e) = self.ir.disable() {
            tracing::warn!(?e, "failed to disable IR receiver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_command_json_shape() {
        let cmd: SystemCommand = serde_json::from_str(r#"{"ct":"d","dc":"advance"}"#).unwrap();
        assert_eq!(cmd, SystemCommand::D(DriveCommand::Advance));
        let cmd: SystemCommand =
            serde_json::from_str(r#"{"ct":"d","dc":"change_speed","d":-20}"#).unwrap();
        assert_eq!(cmd, SystemCommand::D(DriveCommand::ChangeSpeed { d: -20 }));
        let cmd: SystemCommand = serde_json::from_str(r#"{"ct":"m","mc":"autonomous"}"#).unwrap();
        assert_eq!(cmd, SystemCommand::M(ModeCommand::Autonomous));
        let cmd: SystemCommand = serde_json::from_str(r#"{"ct":"l","lc":"off"}"#).unwrap();
        assert_eq!(cmd, SystemCommand::L(LEDCommand::Off));
    }
}
