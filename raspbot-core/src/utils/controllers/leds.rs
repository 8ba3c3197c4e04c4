//! Light bar control for the Raspbot rover.
//!
//! The board drives the whole strip from a fixed palette; the bar can be
//! switched off, set to one palette color, or stepped through the palette.

use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};

use super::i2c::{reg, DeviceError, RegisterBus};

/// Palette understood by the light bar, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LightColor {
    Red = 0,
    Green = 1,
    Blue = 2,
    Yellow = 3,
    Purple = 4,
    Cyan = 5,
    White = 6,
}

impl LightColor {
    pub const PALETTE: [LightColor; 7] = [
        LightColor::Red,
        LightColor::Green,
        LightColor::Blue,
        LightColor::Yellow,
        LightColor::Purple,
        LightColor::Cyan,
        LightColor::White,
    ];

    /// Next color in the cycle, `None` after the last one.
    pub fn next(self) -> Option<LightColor> {
        Self::PALETTE.get(self as usize + 1).copied()
    }
}

/// LED command variants for switching off, cycling or setting a color.
///
/// Serialized as JSON with tag `"lc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "lc", rename_all = "snake_case")]
pub enum LEDCommand {
    /// Step to the next palette color, or off after the last one.
    Cycle,
    /// Turn the whole bar off.
    Off,
    /// Set the bar to the given palette color.
    #[serde(rename = "sc")]
    SC { c: LightColor },
}

/// High-level light bar controller.
///
/// Tracks the current palette position so `Cycle` continues where it left off.
pub struct LightBar<I> {
    bus: RegisterBus<I>,
    current: Option<LightColor>,
}

impl<I, E> LightBar<I>
where
    I: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Create a controller; the bar is assumed off.
    pub fn new(bus: RegisterBus<I>) -> Self {
        Self { bus, current: None }
    }

    /// Color currently shown, `None` when off.
    pub fn current(&self) -> Option<LightColor> {
        self.current
    }

    /// Execute an incoming `LEDCommand`. Bus failures are logged, not returned.
    pub fn ex_command(
        &mut self,
        cmd: LEDCommand,
    ) {
        let result = match cmd {
            LEDCommand::Cycle => self.cycle(),
            LEDCommand::Off => self.off(),
            LEDCommand::SC { c } => self.set(c),
        };
        if let Err(e) = result {
            tracing::error!(?e, ?cmd, "light command failed");
        }
    }

    pub fn cycle(&mut self) -> Result<(), DeviceError<E>> {
        let next = match self.current {
            None => Some(LightColor::Red),
            Some(c) => c.next(),
        };
        match next {
            Some(c) => self.set(c),
            None => self.off(),
        }
    }

    pub fn set(
        &mut self,
        color: LightColor,
    ) -> Result<(), DeviceError<E>> {
        self.current = Some(color);
        self.bus.write_register(reg::LIGHTS_ALL, &[1, color as u8])?;
        tracing::info!(?color, "lights on");
        Ok(())
    }

    pub fn off(&mut self) -> Result<(), DeviceError<E>> {
        self.current = None;
        self.bus.write_register(reg::LIGHTS_ALL, &[0, 0])?;
        tracing::info!("lights off");
        Ok(())
    }
}
