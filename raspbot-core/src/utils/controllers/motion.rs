//! Four-wheel motion driver for the Raspbot rover.
//!
//! Every maneuver is a fixed pattern of per-wheel direction bits applied at the
//! current speed. The driver also owns the ultrasonic distance sensor, which
//! shares the expansion board with the motors.

use embedded_hal::{delay::DelayNs, i2c::I2c};
use serde::{Deserialize, Serialize};

use super::i2c::{reg, DeviceError, RegisterBus};

/// Upper bound of the wheel speed byte.
pub const MAX_SPEED: u8 = 255;
/// Speed used until the first speed command.
pub const DEFAULT_SPEED: u8 = 100;
/// Number of attempts `get_distance` makes before giving up.
pub const DISTANCE_ATTEMPTS: usize = 3;
/// Pause between two distance attempts.
pub const DISTANCE_RETRY_DELAY_MS: u32 = 10;

/// Wheel positions, in motor-id order on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Wheel {
    LeftFront = 0,
    LeftRear = 1,
    RightFront = 2,
    RightRear = 3,
}

impl Wheel {
    pub const ALL: [Wheel; 4] = [
        Wheel::LeftFront,
        Wheel::LeftRear,
        Wheel::RightFront,
        Wheel::RightRear,
    ];
}

/// Rotation sense of a single wheel, as encoded on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Forward = 0,
    Backward = 1,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Named motor-command patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maneuver {
    Advance,
    Reverse,
    SlideLeft,
    SlideRight,
    RotateLeft,
    RotateRight,
}

impl Maneuver {
    /// Direction of each wheel, indexed like [`Wheel::ALL`].
    pub const fn pattern(self) -> [Direction; 4] {
        use Direction::{Backward as B, Forward as F};
        match self {
            Maneuver::Advance => [F, F, F, F],
            Maneuver::Reverse => [B, B, B, B],
            Maneuver::SlideLeft => [B, F, F, B],
            Maneuver::SlideRight => [F, B, B, F],
            Maneuver::RotateLeft => [B, B, F, F],
            Maneuver::RotateRight => [F, F, B, B],
        }
    }

    /// The left/right mirror image of this maneuver.
    pub const fn mirror(self) -> Self {
        match self {
            Maneuver::Advance => Maneuver::Advance,
            Maneuver::Reverse => Maneuver::Reverse,
            Maneuver::SlideLeft => Maneuver::SlideRight,
            Maneuver::SlideRight => Maneuver::SlideLeft,
            Maneuver::RotateLeft => Maneuver::RotateRight,
            Maneuver::RotateRight => Maneuver::RotateLeft,
        }
    }
}

/// One distance reading in millimeters, or the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistanceSample(u16);

impl DistanceSample {
    /// Reserved "no valid reading" value.
    pub const INVALID: DistanceSample = DistanceSample(0);

    pub const fn from_mm(mm: u16) -> Self {
        DistanceSample(mm)
    }

    /// Combine the sensor's high and low register bytes.
    pub const fn from_bytes(
        high: u8,
        low: u8,
    ) -> Self {
        DistanceSample(((high as u16) << 8) | low as u16)
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Millimeters, or `None` for the sentinel.
    pub const fn mm(self) -> Option<u16> {
        if self.is_valid() {
            Some(self.0)
        } else {
            None
        }
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

/// Drive-train seam used by the autonomous controller.
///
/// Motion commands are fire-and-forget: a robot in motion must keep running
/// its control loop through a single failed bus write.
pub trait DriveTrain {
    type Error: core::fmt::Debug;

    fn set_speed(
        &mut self,
        speed: i32,
    );
    fn speed(&self) -> u8;
    fn stop(&mut self);
    fn maneuver(
        &mut self,
        maneuver: Maneuver,
    );
    fn enable_distance_sensor(
        &mut self,
        on: bool,
    ) -> Result<(), Self::Error>;
    fn get_distance(&mut self) -> DistanceSample;

    fn advance(&mut self) {
        self.maneuver(Maneuver::Advance)
    }
    fn reverse(&mut self) {
        self.maneuver(Maneuver::Reverse)
    }
    fn slide_left(&mut self) {
        self.maneuver(Maneuver::SlideLeft)
    }
    fn slide_right(&mut self) {
        self.maneuver(Maneuver::SlideRight)
    }
    fn rotate_left(&mut self) {
        self.maneuver(Maneuver::RotateLeft)
    }
    fn rotate_right(&mut self) {
        self.maneuver(Maneuver::RotateRight)
    }
    fn change_speed(
        &mut self,
        delta: i32,
    ) {
        let next = i32::from(self.speed()) + delta;
        self.set_speed(next);
    }
}

/// Motor and distance-sensor driver over the expansion board.
pub struct MotionDriver<I, D> {
    bus: RegisterBus<I>,
    delay: D,
    speed: u8,
}

impl<I, D, E> MotionDriver<I, D>
where
    I: I2c<Error = E>,
    D: DelayNs,
    E: core::fmt::Debug,
{
    /// Create a driver at [`DEFAULT_SPEED`]. No bus traffic is issued.
    pub fn new(
        bus: RegisterBus<I>,
        delay: D,
    ) -> Self {
        Self {
            bus,
            delay,
            speed: DEFAULT_SPEED,
        }
    }

    /// Apply a maneuver, reporting the first failed wheel write.
    ///
    /// All four wheels are attempted even if an earlier one fails.
    pub fn try_maneuver(
        &mut self,
        maneuver: Maneuver,
    ) -> Result<(), DeviceError<E>> {
        let speed = self.speed;
        self.write_wheels(maneuver.pattern(), speed)
    }

    /// Bring every wheel to zero speed, reporting the first failed write.
    pub fn try_stop(&mut self) -> Result<(), DeviceError<E>> {
        self.write_wheels([Direction::Forward; 4], 0)
    }

    fn write_wheels(
        &mut self,
        pattern: [Direction; 4],
        speed: u8,
    ) -> Result<(), DeviceError<E>> {
        let mut first_err = None;
        for (wheel, direction) in Wheel::ALL.iter().zip(pattern) {
            if let Err(e) = self.bus.write_motor(*wheel as u8, direction as u8, speed) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_distance_once(&mut self) -> Result<DistanceSample, DeviceError<E>> {
        let high = self.bus.read_register(reg::DISTANCE_HIGH)?;
        let low = self.bus.read_register(reg::DISTANCE_LOW)?;
        Ok(DistanceSample::from_bytes(high, low))
    }

    /// Release the bus and delay providers.
    pub fn release(self) -> (RegisterBus<I>, D) {
        (self.bus, self.delay)
    }
}

impl<I, D, E> DriveTrain for MotionDriver<I, D>
where
    I: I2c<Error = E>,
    D: DelayNs,
    E: core::fmt::Debug,
{
    type Error = DeviceError<E>;

    fn set_speed(
        &mut self,
        speed: i32,
    ) {
        self.speed = speed.clamp(0, i32::from(MAX_SPEED)) as u8;
        tracing::debug!(speed = self.speed, "speed set");
    }

    fn speed(&self) -> u8 {
        self.speed
    }

    fn stop(&mut self) {
        if let Err(e) = self.try_stop() {
            tracing::error!(?e, "failed to stop motors");
        }
    }

    fn maneuver(
        &mut self,
        maneuver: Maneuver,
    ) {
        if let Err(e) = self.try_maneuver(maneuver) {
            tracing::error!(?e, ?maneuver, "maneuver write failed");
        }
    }

    fn enable_distance_sensor(
        &mut self,
        on: bool,
    ) -> Result<(), Self::Error> {
        self.bus
            .write_register(reg::ULTRASONIC_SWITCH, &[on as u8])?;
        tracing::info!(on, "distance sensor switched");
        Ok(())
    }

    /// Read the sensor, retrying transient zero readings and bus failures.
    ///
    /// Blocks for at most `(DISTANCE_ATTEMPTS - 1) * DISTANCE_RETRY_DELAY_MS`
    /// on top of the bus transfers. Returns [`DistanceSample::INVALID`] once
    /// every attempt is spent.
    fn get_distance(&mut self) -> DistanceSample {
        for attempt in 0..DISTANCE_ATTEMPTS {
            if attempt > 0 {
                self.delay.delay_ms(DISTANCE_RETRY_DELAY_MS);
            }
            match self.read_distance_once() {
                Ok(sample) if sample.is_valid() => {
                    tracing::trace!(mm = sample.raw(), attempt, "distance read");
                    return sample;
                }
                Ok(_) => tracing::debug!(attempt, "zero distance reading, retrying"),
                Err(e) => tracing::debug!(?e, attempt, "distance read failed, retrying"),
            }
        }
        tracing::warn!("distance sensor gave no valid reading");
        DistanceSample::INVALID
    }
}
