//! Simulated expansion board for running the rover without hardware.
//!
//! The board answers the same registers as the real one. A single wall sits
//! ahead of the rover: driving forward closes the gap, reversing opens it, and
//! rotating far enough swings the rover to face the next wall in `WALLS`.

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use raspbot_core::utils::{
    controllers::i2c::{reg, RASPBOT_ADDRESS},
    Instant,
};

/// Distances of successive walls, cycled each time the rover turns away.
const WALLS: [f32; 4] = [900.0, 1500.0, 650.0, 2000.0];
/// Ground speed in mm/s per unit of wheel speed.
const MM_PER_SPEED: f32 = 2.0;
/// Rotation in degrees/s per unit of wheel speed.
const DEG_PER_SPEED: f32 = 3.0;
/// Every Nth distance read returns a glitched zero.
const GLITCH_EVERY: u32 = 17;

pub struct SimBus {
    wheels: [i16; 4],
    distance_mm: f32,
    heading_deg: f32,
    wall: usize,
    latched: u16,
    reads: u32,
    ir_enabled: bool,
    sensor_enabled: bool,
    last_update: Instant,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            wheels: [0; 4],
            distance_mm: WALLS[0],
            heading_deg: 0.0,
            wall: 0,
            latched: 0,
            reads: 0,
            ir_enabled: false,
            sensor_enabled: false,
            last_update: Instant::now(),
        }
    }

    /// Signed speed of each wheel (LF, LR, RF, RR).
    pub fn wheels(&self) -> [i16; 4] {
        self.wheels
    }

    pub fn ir_enabled(&self) -> bool {
        self.ir_enabled
    }

    /// Integrate wheel motion since the last update.
    fn advance_world(&mut self) {
        let now = Instant::now();
        let dt = now.saturating_duration_since(self.last_update).as_micros() as f32 / 1e6;
        self.last_update = now;

        let [lf, lr, rf, rr] = self.wheels.map(f32::from);
        let forward = (lf + lr + rf + rr) / 4.0;
        let spin = ((rf + rr) - (lf + lr)) / 4.0;

        self.distance_mm = (self.distance_mm - forward * MM_PER_SPEED * dt).max(20.0);
        self.heading_deg += spin.abs() * DEG_PER_SPEED * dt;
        if self.heading_deg >= 90.0 {
            self.heading_deg = 0.0;
            self.wall = (self.wall + 1) % WALLS.len();
            self.distance_mm = WALLS[self.wall];
            tracing::debug!(wall = self.distance_mm, "sim: facing a new wall");
        }
    }

    fn write_register(
        &mut self,
        frame: &[u8],
    ) -> Result<(), ErrorKind> {
        self.advance_world();
        match frame {
            [] => Ok(()),
            [reg::MOTOR, id, dir, speed] if *id < 4 => {
                let s = i16::from(*speed);
                self.wheels[usize::from(*id)] = if *dir == 0 { s } else { -s };
                Ok(())
            }
            [reg::LIGHTS_ALL, state, color] => {
                tracing::info!(on = *state != 0, color, "sim: lights");
                Ok(())
            }
            [reg::IR_SWITCH, state] => {
                self.ir_enabled = *state != 0;
                Ok(())
            }
            [reg::ULTRASONIC_SWITCH, state] => {
                self.sensor_enabled = *state != 0;
                Ok(())
            }
            _ => Err(ErrorKind::Other),
        }
    }

    fn read_register(
        &mut self,
        register: u8,
    ) -> Result<u8, ErrorKind> {
        match register {
            reg::IR_CODE => Ok(0xFF),
            reg::DISTANCE_HIGH => {
                self.advance_world();
                self.reads = self.reads.wrapping_add(1);
                self.latched = if !self.sensor_enabled || self.reads % GLITCH_EVERY == 0 {
                    0
                } else {
                    self.distance_mm as u16
                };
                Ok((self.latched >> 8) as u8)
            }
            reg::DISTANCE_LOW => Ok(self.latched as u8),
            _ => Err(ErrorKind::Other),
        }
    }
}

impl ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != RASPBOT_ADDRESS {
            return Err(ErrorKind::NoAcknowledge(
                embedded_hal::i2c::NoAcknowledgeSource::Address,
            ));
        }
        let mut selected = None;
        for op in operations {
            match op {
                Operation::Write(frame) => {
                    if frame.len() == 1 {
                        selected = Some(frame[0]);
                    } else {
                        self.write_register(frame)?;
                    }
                }
                Operation::Read(buf) => {
                    let register = selected.ok_or(ErrorKind::Other)?;
                    for b in buf.iter_mut() {
                        *b = self.read_register(register)?;
                    }
                }
            }
        }
        Ok(())
    }
}
