//! IR remote receiver.
//!
//! The board decodes NEC frames itself and latches the command byte in a
//! register; this module only polls it and maps codes to remote keys.

use embedded_hal::i2c::I2c;

use super::{
    i2c::{reg, DeviceError, RegisterBus},
    leds::LEDCommand,
    DriveCommand, ModeCommand, SystemCommand,
};

/// Register value reported while no key is pressed.
pub const IR_IDLE: u8 = 0xFF;
/// Speed step applied by the Plus and Minus keys.
pub const SPEED_STEP: i32 = 20;

/// Keys of the bundled remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoteKey {
    Power = 0x00,
    Up = 0x01,
    Light = 0x02,
    Left = 0x04,
    Sound = 0x05,
    Right = 0x06,
    TurnLeft = 0x08,
    Down = 0x09,
    TurnRight = 0x0A,
    Plus = 0x0C,
    Zero = 0x0D,
    Minus = 0x0E,
    One = 0x10,
    Two = 0x11,
    Three = 0x12,
    Four = 0x14,
    Five = 0x15,
    Six = 0x16,
    Seven = 0x18,
    Eight = 0x19,
    Nine = 0x1A,
}

impl RemoteKey {
    /// Decode a raw command byte.
    pub fn from_code(code: u8) -> Option<Self> {
        use RemoteKey::*;
        let key = match code {
            0x00 => Power,
            0x01 => Up,
            0x02 => Light,
            0x04 => Left,
            0x05 => Sound,
            0x06 => Right,
            0x08 => TurnLeft,
            0x09 => Down,
            0x0A => TurnRight,
            0x0C => Plus,
            0x0D => Zero,
            0x0E => Minus,
            0x10 => One,
            0x11 => Two,
            0x12 => Three,
            0x14 => Four,
            0x15 => Five,
            0x16 => Six,
            0x18 => Seven,
            0x19 => Eight,
            0x1A => Nine,
            _ => return None,
        };
        Some(key)
    }

    /// Command bound to this key, if any.
    pub fn command(self) -> Option<SystemCommand> {
        use RemoteKey::*;
        let cmd = match self {
            Up => SystemCommand::D(DriveCommand::Advance),
            Down => SystemCommand::D(DriveCommand::Reverse),
            Left => SystemCommand::D(DriveCommand::SlideLeft),
            Right => SystemCommand::D(DriveCommand::SlideRight),
            TurnLeft => SystemCommand::D(DriveCommand::RotateLeft),
            TurnRight => SystemCommand::D(DriveCommand::RotateRight),
            Power | Five | Zero => SystemCommand::D(DriveCommand::Stop),
            Light => SystemCommand::L(LEDCommand::Cycle),
            Plus => SystemCommand::D(DriveCommand::ChangeSpeed { d: SPEED_STEP }),
            Minus => SystemCommand::D(DriveCommand::ChangeSpeed { d: -SPEED_STEP }),
            One => SystemCommand::M(ModeCommand::Autonomous),
            Two => SystemCommand::M(ModeCommand::Manual),
            Sound | Three | Four | Six | Seven | Eight | Nine => return None,
        };
        Some(cmd)
    }
}

/// Poller for the IR code register.
pub struct IrReceiver<I> {
    bus: RegisterBus<I>,
    enabled: bool,
}

impl<I, E> IrReceiver<I>
where
    I: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Create a receiver; it stays deaf until [`IrReceiver::enable`].
    pub fn new(bus: RegisterBus<I>) -> Self {
        Self {
            bus,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) -> Result<(), DeviceError<E>> {
        self.bus.write_register(reg::IR_SWITCH, &[1])?;
        self.enabled = true;
        tracing::info!("IR remote enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), DeviceError<E>> {
        self.enabled = false;
        self.bus.write_register(reg::IR_SWITCH, &[0])
    }

    /// Read the latched code, `None` when disabled, idle or unreadable.
    pub fn read_code(&mut self) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        match self.bus.read_register(reg::IR_CODE) {
            Ok(IR_IDLE) => None,
            Ok(code) => Some(code),
            Err(e) => {
                tracing::debug!(?e, "IR read failed");
                None
            }
        }
    }

    /// Read and decode one key press.
    pub fn read_key(&mut self) -> Option<RemoteKey> {
        let code = self.read_code()?;
        let key = RemoteKey::from_code(code);
        if key.is_none() {
            tracing::debug!("unknown IR code 0x{:02X}", code);
        }
        key
    }
}
