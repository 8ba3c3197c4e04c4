//! Register protocol of the Raspbot expansion board.
//!
//! Motors, lights, the IR receiver and the ultrasonic sensor all sit behind one
//! microcontroller on the I2C bus. Writes are `[register, payload..]`; reads
//! address a register and then read it back with a repeated start.

use embedded_hal::i2c::I2c;

/// Default 7-bit I2C address of the expansion board.
pub const RASPBOT_ADDRESS: u8 = 0x2B;

/// Register map of the expansion board.
pub mod reg {
    /// `[motor_id, direction, speed]`
    pub const MOTOR: u8 = 0x01;
    /// `[state, color]` for the whole light bar.
    pub const LIGHTS_ALL: u8 = 0x03;
    pub const IR_SWITCH: u8 = 0x05;
    pub const ULTRASONIC_SWITCH: u8 = 0x07;
    /// Last decoded IR command byte, `0xFF` when idle.
    pub const IR_CODE: u8 = 0x0C;
    pub const DISTANCE_LOW: u8 = 0x1A;
    pub const DISTANCE_HIGH: u8 = 0x1B;
}

/// Largest payload accepted after the register byte.
pub const MAX_PAYLOAD: usize = 3;

/// Errors that can occur when talking to the expansion board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError<E: core::fmt::Debug> {
    /// The underlying bus transaction failed.
    Bus(E),
    /// Payload longer than a register frame can carry.
    PayloadTooLong(usize),
}

impl<E: core::fmt::Debug> core::fmt::Display for DeviceError<E> {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        match self {
            DeviceError::Bus(e) => write!(f, "i2c bus error: {:?}", e),
            DeviceError::PayloadTooLong(n) => write!(
                f,
                "payload of {} bytes exceeds {} byte frame",
                n, MAX_PAYLOAD
            ),
        }
    }
}

/// Thin register read/write layer over a single I2C device handle.
pub struct RegisterBus<I> {
    i2c: I,
    address: u8,
}

impl<I, E> RegisterBus<I>
where
    I: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Wrap an I2C handle talking to the board at the default address.
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, RASPBOT_ADDRESS)
    }

    pub fn with_address(
        i2c: I,
        address: u8,
    ) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Write `payload` to `register`.
    ///
    /// Payloads longer than [`MAX_PAYLOAD`] are rejected before touching the bus.
    pub fn write_register(
        &mut self,
        register: u8,
        payload: &[u8],
    ) -> Result<(), DeviceError<E>> {
        let len = payload.len();
        if len > MAX_PAYLOAD {
            return Err(DeviceError::PayloadTooLong(len));
        }
        let mut frame = [0u8; MAX_PAYLOAD + 1];
        frame[0] = register;
        frame[1..=len].copy_from_slice(payload);
        self.i2c
            .write(self.address, &frame[..=len])
            .map_err(DeviceError::Bus)
    }

    /// Read one byte from `register`.
    pub fn read_register(
        &mut self,
        register: u8,
    ) -> Result<u8, DeviceError<E>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(DeviceError::Bus)?;
        Ok(buf[0])
    }

    /// Command a single wheel motor.
    pub fn write_motor(
        &mut self,
        motor_id: u8,
        direction: u8,
        speed: u8,
    ) -> Result<(), DeviceError<E>> {
        self.write_register(reg::MOTOR, &[motor_id, direction, speed])
    }

    /// Check whether the board acknowledges its address.
    pub fn probe(&mut self) -> bool {
        self.i2c.write(self.address, &[]).is_ok()
    }

    /// Release the wrapped I2C handle.
    pub fn release(self) -> I {
        self.i2c
    }
}

/// Scan the whole 7-bit address range and log every device that answers.
pub fn scan_bus<I: I2c>(i2c: &mut I) -> usize {
    let mut found = 0;
    for addr in 0x03..0x78 {
        if i2c.write(addr, &[]).is_ok() {
            tracing::warn!("I2C device found at 0x{:02X}", addr);
            found += 1;
        }
    }
    found
}
