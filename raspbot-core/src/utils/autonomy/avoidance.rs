//! Non-blocking obstacle-avoidance controller.
//!
//! The controller is a four-state machine stepped by an external loop:
//!
//! - `Idle`: nothing is commanded.
//! - `Forward`: drive straight, polling the distance sensor no more than once
//!   per poll interval and deciding on the mean of the recent readings.
//! - `BackingUp` / `Turning`: time-boxed evasive maneuvers. They run without
//!   reading the sensor and hand back to `Forward` once their dwell expires.
//!
//! `step` never sleeps. The only blocking it can do is one distance read,
//! whose retries are bounded inside the driver.

use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use super::history::{DistanceHistory, HISTORY_CAPACITY};
use crate::utils::{clock::Clock, controllers::motion::DriveTrain};

/// Longest accepted poll interval or dwell time: one day.
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// What to do with a poll that yields no valid reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidSamplePolicy {
    /// Stop the motors and wait for the next valid reading.
    #[default]
    Stop,
    /// Keep the previous command and treat the poll as noise.
    Ignore,
}

/// Tuning of the avoidance controller, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    /// Below this smoothed distance the rover backs up (mm).
    pub near_mm: u16,
    /// At or below this smoothed distance the rover turns away (mm).
    pub far_mm: u16,
    pub cruise_speed: u8,
    pub poll_interval_ms: u64,
    pub backup_ms: u64,
    pub turn_ms: u64,
    /// Number of valid readings averaged per decision.
    pub history_size: usize,
    pub invalid_sample: InvalidSamplePolicy,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            near_mm: 200,
            far_mm: 425,
            cruise_speed: 50,
            poll_interval_ms: 100,
            backup_ms: 500,
            turn_ms: 400,
            history_size: 3,
            invalid_sample: InvalidSamplePolicy::Stop,
        }
    }
}

impl AvoidanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.near_mm == 0 {
            return Err(ConfigError::ZeroNearDistance);
        }
        if self.near_mm > self.far_mm {
            return Err(ConfigError::NearBeyondFar {
                near_mm: self.near_mm,
                far_mm: self.far_mm,
            });
        }
        if self.history_size == 0 || self.history_size > HISTORY_CAPACITY {
            return Err(ConfigError::HistorySize(self.history_size));
        }
        for (field, ms) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("backup_ms", self.backup_ms),
            ("turn_ms", self.turn_ms),
        ] {
            if ms > MAX_DURATION_MS {
                return Err(ConfigError::DurationOutOfRange { field, ms });
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backup_duration(&self) -> Duration {
        Duration::from_millis(self.backup_ms)
    }

    pub fn turn_duration(&self) -> Duration {
        Duration::from_millis(self.turn_ms)
    }
}

/// Rejected controller configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NearBeyondFar { near_mm: u16, far_mm: u16 },
    /// A zero threshold collides with the invalid-reading sentinel.
    ZeroNearDistance,
    /// Smoothing window outside `1..=HISTORY_CAPACITY`.
    HistorySize(usize),
    /// A poll interval or dwell time above [`MAX_DURATION_MS`].
    DurationOutOfRange { field: &'static str, ms: u64 },
}

impl core::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        match self {
            ConfigError::NearBeyondFar { near_mm, far_mm } => write!(
                f,
                "near distance {}mm exceeds far distance {}mm",
                near_mm, far_mm
            ),
            ConfigError::ZeroNearDistance => write!(f, "near distance must be non-zero"),
            ConfigError::HistorySize(n) => write!(
                f,
                "history size {} outside 1..={}",
                n, HISTORY_CAPACITY
            ),
            ConfigError::DurationOutOfRange { field, ms } => write!(
                f,
                "{} of {}ms exceeds {}ms",
                field, ms, MAX_DURATION_MS
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Forward,
    BackingUp,
    Turning,
}

/// Obstacle-avoidance state machine over a [`DriveTrain`].
///
/// The controller owns the drive train; manual access is only handed out
/// while it is idle (see [`ObstacleAvoidance::manual`]).
pub struct ObstacleAvoidance<D, C> {
    driver: D,
    clock: C,
    config: AvoidanceConfig,
    state: ControllerState,
    history: DistanceHistory,
    state_entered_at: Instant,
    last_sensor_check_at: Option<Instant>,
    smoothed: Option<u16>,
    resume_speed: Option<u8>,
}

impl<D, C> ObstacleAvoidance<D, C>
where
    D: DriveTrain,
    C: Clock,
{
    pub fn new(
        driver: D,
        clock: C,
        config: AvoidanceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            driver,
            clock,
            config,
            state: ControllerState::Idle,
            history: DistanceHistory::new(config.history_size),
            state_entered_at: now,
            last_sensor_check_at: None,
            smoothed: None,
            resume_speed: None,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> &AvoidanceConfig {
        &self.config
    }

    /// Mean distance behind the most recent decision.
    pub fn smoothed(&self) -> Option<u16> {
        self.smoothed
    }

    pub fn is_active(&self) -> bool {
        self.state != ControllerState::Idle
    }

    /// Read-only view of the drive train.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Drive train for manual commands, only while the controller is idle.
    pub fn manual(&mut self) -> Option<&mut D> {
        match self.state {
            ControllerState::Idle => Some(&mut self.driver),
            _ => None,
        }
    }

    /// Leave `Idle`: cruise speed, sensor on, advance.
    ///
    /// Calling it while already active does nothing.
    pub fn start(&mut self) {
        if self.is_active() {
            tracing::debug!(state = ?self.state, "avoidance already running");
            return;
        }
        self.resume_speed = Some(self.driver.speed());
        self.driver.set_speed(i32::from(self.config.cruise_speed));
        if let Err(e) = self.driver.enable_distance_sensor(true) {
            tracing::warn!(?e, "could not enable distance sensor");
        }
        self.driver.advance();
        self.last_sensor_check_at = None;
        self.smoothed = None;
        self.enter(ControllerState::Forward);
    }

    /// Return to `Idle` from any state: sensor off, motors stopped.
    pub fn stop(&mut self) {
        if let Err(e) = self.driver.enable_distance_sensor(false) {
            tracing::warn!(?e, "could not disable distance sensor");
        }
        self.driver.stop();
        if let Some(speed) = self.resume_speed.take() {
            self.driver.set_speed(i32::from(speed));
        }
        if self.state != ControllerState::Idle {
            self.enter(ControllerState::Idle);
        }
    }

    /// Evaluate the state machine once.
    pub fn step(&mut self) {
        let now = self.clock.now();
        match self.state {
            ControllerState::Idle => {}
            ControllerState::Forward => self.step_forward(now),
            ControllerState::BackingUp => {
                if self.elapsed(now) >= self.config.backup_duration() {
                    self.driver.stop();
                    self.enter(ControllerState::Forward);
                }
            }
            ControllerState::Turning => {
                if self.elapsed(now) >= self.config.turn_duration() {
                    self.driver.stop();
                    self.enter(ControllerState::Forward);
                }
            }
        }
    }

    fn step_forward(
        &mut self,
        now: Instant,
    ) {
        if let Some(last) = self.last_sensor_check_at {
            if now.saturating_duration_since(last) < self.config.poll_interval() {
                return;
            }
        }
        self.last_sensor_check_at = Some(now);

        let Some(mm) = self.driver.get_distance().mm() else {
            match self.config.invalid_sample {
                InvalidSamplePolicy::Stop => {
                    tracing::warn!("no valid distance, holding still");
                    self.driver.stop();
                }
                InvalidSamplePolicy::Ignore => {
                    tracing::debug!("no valid distance, keeping course");
                }
            }
            return;
        };

        self.history.push(mm);
        let Some(mean) = self.history.mean() else {
            return;
        };
        self.smoothed = Some(mean);

        if mean < self.config.near_mm {
            tracing::info!(mean, "obstacle very close, backing up");
            self.driver.stop();
            self.driver.reverse();
            self.enter(ControllerState::BackingUp);
        } else if mean <= self.config.far_mm {
            tracing::info!(mean, "obstacle ahead, turning left");
            self.driver.stop();
            self.driver.rotate_left();
            self.enter(ControllerState::Turning);
        } else {
            tracing::trace!(mean, "path clear");
            self.driver.advance();
        }
    }

    fn elapsed(
        &self,
        now: Instant,
    ) -> Duration {
        now.saturating_duration_since(self.state_entered_at)
    }

    fn enter(
        &mut self,
        next: ControllerState,
    ) {
        tracing::info!(from = ?self.state, to = ?next, "avoidance state change");
        self.state = next;
        self.state_entered_at = self.clock.now();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{collections::VecDeque, vec::Vec};

    use super::*;
    use crate::utils::{
        clock::ManualClock,
        controllers::motion::{DistanceSample, Maneuver},
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Speed(u8),
        Stop,
        Move(Maneuver),
        Sensor(bool),
        Read,
    }

    /// Drive train that replays scripted readings and records every command.
    struct ScriptedDrive {
        readings: VecDeque<u16>,
        fallback: u16,
        speed: u8,
        log: Vec<Event>,
    }

    impl ScriptedDrive {
        fn constant(mm: u16) -> Self {
            Self::script(&[], mm)
        }

        fn script(
            readings: &[u16],
            fallback: u16,
        ) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                fallback,
                speed: 100,
                log: Vec::new(),
            }
        }

        fn count(
            &self,
            event: Event,
        ) -> usize {
            self.log.iter().filter(|&&e| e == event).count()
        }

        fn last(&self) -> Option<Event> {
            self.log.last().copied()
        }
    }

    impl DriveTrain for ScriptedDrive {
        type Error = core::convert::Infallible;

        fn set_speed(
            &mut self,
            speed: i32,
        ) {
            self.speed = speed.clamp(0, 255) as u8;
            self.log.push(Event::Speed(self.speed));
        }

        fn speed(&self) -> u8 {
            self.speed
        }

        fn stop(&mut self) {
            self.log.push(Event::Stop);
        }

        fn maneuver(
            &mut self,
            maneuver: Maneuver,
        ) {
            self.log.push(Event::Move(maneuver));
        }

        fn enable_distance_sensor(
            &mut self,
            on: bool,
        ) -> Result<(), Self::Error> {
            self.log.push(Event::Sensor(on));
            Ok(())
        }

        fn get_distance(&mut self) -> DistanceSample {
            self.log.push(Event::Read);
            DistanceSample::from_mm(self.readings.pop_front().unwrap_or(self.fallback))
        }
    }

    fn config() -> AvoidanceConfig {
        AvoidanceConfig {
            near_mm: 150,
            far_mm: 300,
            ..AvoidanceConfig::default()
        }
    }

    fn started(
        drive: ScriptedDrive,
        clock: &ManualClock,
    ) -> ObstacleAvoidance<ScriptedDrive, &ManualClock> {
        let mut ctrl = ObstacleAvoidance::new(drive, clock, config()).unwrap();
        ctrl.start();
        ctrl
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn start_enters_forward_at_cruise_speed() {
        let clock = ManualClock::new();
        let ctrl = started(ScriptedDrive::constant(1000), &clock);
        assert_eq!(ctrl.state(), ControllerState::Forward);
        assert_eq!(
            ctrl.driver().log,
            [Event::Speed(50), Event::Sensor(true), Event::Move(Maneuver::Advance)]
        );
    }

    #[test]
    fn clear_path_never_leaves_forward() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::constant(301), &clock);
        for _ in 0..200 {
            ctrl.step();
            assert_eq!(ctrl.state(), ControllerState::Forward);
            clock.advance(ms(10));
        }
        let reads = ctrl.driver().count(Event::Read);
        assert_eq!(reads, 20);
        // one advance from start plus one re-assertion per poll
        assert_eq!(ctrl.driver().count(Event::Move(Maneuver::Advance)), reads + 1);
        assert_eq!(ctrl.driver().count(Event::Stop), 0);
    }

    #[test]
    fn near_reading_backs_up_for_dwell() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[100], 1000), &clock);
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::BackingUp);
        assert_eq!(
            &ctrl.driver().log[3..],
            [Event::Read, Event::Stop, Event::Move(Maneuver::Reverse)]
        );

        clock.advance(ms(499));
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::BackingUp);
        assert_eq!(ctrl.driver().count(Event::Read), 1, "backing up is sensor-blind");

        clock.advance(ms(1));
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::Forward);
        assert_eq!(ctrl.driver().last(), Some(Event::Stop));

        // the old poll is long past, so the next tick reads again
        ctrl.step();
        assert_eq!(ctrl.driver().count(Event::Read), 2);
        assert_eq!(ctrl.driver().last(), Some(Event::Move(Maneuver::Advance)));
    }

    #[test]
    fn turn_dwell_then_forward() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[200], 1000), &clock);
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::Turning);
        assert_eq!(ctrl.driver().last(), Some(Event::Move(Maneuver::RotateLeft)));

        clock.advance(ms(399));
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::Turning);
        clock.advance(ms(1));
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::Forward);
    }

    #[test]
    fn threshold_boundaries() {
        let cases = [
            (149, ControllerState::BackingUp),
            (150, ControllerState::Turning),
            (300, ControllerState::Turning),
            (301, ControllerState::Forward),
        ];
        for (mm, expected) in cases {
            let clock = ManualClock::new();
            let mut ctrl = started(ScriptedDrive::constant(mm), &clock);
            ctrl.step();
            assert_eq!(ctrl.state(), expected, "reading {}mm", mm);
        }
    }

    #[test]
    fn polling_is_throttled_independent_of_tick_rate() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::constant(1000), &clock);
        for _ in 0..=1000 {
            ctrl.step();
            clock.advance(ms(1));
        }
        // t = 0, 100, ..., 1000
        assert_eq!(ctrl.driver().count(Event::Read), 11);
    }

    #[test]
    fn stop_from_any_state_goes_idle() {
        for (reading, state) in [
            (1000, ControllerState::Forward),
            (100, ControllerState::BackingUp),
            (200, ControllerState::Turning),
        ] {
            let clock = ManualClock::new();
            let mut ctrl = started(ScriptedDrive::constant(reading), &clock);
            ctrl.step();
            assert_eq!(ctrl.state(), state);

            ctrl.stop();
            assert_eq!(ctrl.state(), ControllerState::Idle);
            let log = &ctrl.driver().log;
            let tail = &log[log.len() - 3..];
            assert_eq!(tail, [Event::Sensor(false), Event::Stop, Event::Speed(100)]);

            clock.advance(ms(1000));
            let before = ctrl.driver().log.len();
            ctrl.step();
            assert_eq!(ctrl.driver().log.len(), before, "idle issues nothing");
        }
    }

    #[test]
    fn stop_while_idle_still_stops_motors() {
        let clock = ManualClock::new();
        let mut ctrl = ObstacleAvoidance::new(ScriptedDrive::constant(1000), &clock, config()).unwrap();
        ctrl.stop();
        assert_eq!(ctrl.state(), ControllerState::Idle);
        assert_eq!(ctrl.driver().log, [Event::Sensor(false), Event::Stop]);
    }

    #[test]
    fn first_close_reading_backs_up() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[100], 1000), &clock);
        ctrl.step();
        assert_eq!(ctrl.smoothed(), Some(100));
        assert_eq!(ctrl.state(), ControllerState::BackingUp);
    }

    #[test]
    fn decision_uses_last_three_readings() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[700, 400, 100, 100], 1000), &clock);
        ctrl.step();
        for expected in [550, 400] {
            clock.advance(ms(100));
            ctrl.step();
            assert_eq!(ctrl.smoothed(), Some(expected));
            assert_eq!(ctrl.state(), ControllerState::Forward);
        }
        // 700 has left the window: (400 + 100 + 100) / 3
        clock.advance(ms(100));
        ctrl.step();
        assert_eq!(ctrl.smoothed(), Some(200));
        assert_eq!(ctrl.state(), ControllerState::Turning);
    }

    #[test]
    fn readings_before_a_maneuver_are_forgotten() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[100, 350], 1000), &clock);
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::BackingUp);

        clock.advance(ms(500));
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::Forward);

        // with the 100 still averaged in this would be 225 and a turn
        ctrl.step();
        assert_eq!(ctrl.smoothed(), Some(350));
        assert_eq!(ctrl.state(), ControllerState::Forward);
        assert_eq!(ctrl.driver().last(), Some(Event::Move(Maneuver::Advance)));
    }

    #[test]
    fn single_dip_is_smoothed_away() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[600, 50, 600], 1000), &clock);
        ctrl.step();
        assert_eq!(ctrl.smoothed(), Some(600));
        for expected in [325, 416] {
            clock.advance(ms(100));
            ctrl.step();
            assert_eq!(ctrl.smoothed(), Some(expected));
            assert_eq!(ctrl.state(), ControllerState::Forward);
        }
    }

    #[test]
    fn invalid_sample_stops_under_fail_safe_policy() {
        let clock = ManualClock::new();
        let mut ctrl = started(ScriptedDrive::script(&[0, 1000], 1000), &clock);
        ctrl.step();
        assert_eq!(ctrl.state(), ControllerState::Forward);
        assert_eq!(ctrl.driver().last(), Some(Event::Stop));
        assert_eq!(ctrl.smoothed(), None);

        clock.advance(ms(100));
        ctrl.step();
        assert_eq!(ctrl.driver().last(), Some(Event::Move(Maneuver::Advance)));
        assert_eq!(ctrl.smoothed(), Some(1000));
    }

    #[test]
    fn invalid_sample_ignored_under_lenient_policy() {
        let clock = ManualClock::new();
        let cfg = AvoidanceConfig {
            invalid_sample: InvalidSamplePolicy::Ignore,
            ..config()
        };
        let mut ctrl = ObstacleAvoidance::new(ScriptedDrive::constant(0), &clock, cfg).unwrap();
        ctrl.start();
        ctrl.step();
        assert_eq!(ctrl.driver().last(), Some(Event::Read));
        assert_eq!(ctrl.driver().count(Event::Stop), 0);
    }

    #[test]
    fn manual_access_only_while_idle() {
        let clock = ManualClock::new();
        let mut ctrl = ObstacleAvoidance::new(ScriptedDrive::constant(1000), &clock, config()).unwrap();
        assert!(ctrl.manual().is_some());
        ctrl.start();
        assert!(ctrl.manual().is_none());
        ctrl.start();
        assert_eq!(ctrl.driver().count(Event::Sensor(true)), 1, "second start is a no-op");
        ctrl.stop();
        assert!(ctrl.manual().is_some());
    }

    #[test]
    fn rejects_inconsistent_config() {
        let bad = AvoidanceConfig {
            near_mm: 500,
            far_mm: 400,
            ..AvoidanceConfig::default()
        };
        assert_eq!(
            bad.validate(),
            Err(ConfigError::NearBeyondFar {
                near_mm: 500,
                far_mm: 400
            })
        );
        let bad = AvoidanceConfig {
            history_size: 0,
            ..AvoidanceConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::HistorySize(0)));
        let bad = AvoidanceConfig {
            history_size: HISTORY_CAPACITY + 1,
            ..AvoidanceConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = AvoidanceConfig {
            near_mm: 0,
            ..AvoidanceConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::ZeroNearDistance));

        let clock = ManualClock::new();
        assert!(ObstacleAvoidance::new(ScriptedDrive::constant(1), &clock, bad).is_err());
    }

    #[test]
    fn rejects_durations_beyond_a_day() {
        let ok = AvoidanceConfig {
            backup_ms: MAX_DURATION_MS,
            ..AvoidanceConfig::default()
        };
        assert_eq!(ok.validate(), Ok(()));

        let cfg: AvoidanceConfig =
            serde_json::from_str(r#"{"backup_ms":18446744073709551615}"#).unwrap();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DurationOutOfRange {
                field: "backup_ms",
                ms: u64::MAX
            })
        );
        let clock = ManualClock::new();
        assert!(ObstacleAvoidance::new(ScriptedDrive::constant(1), &clock, cfg).is_err());

        for bad in [
            AvoidanceConfig {
                poll_interval_ms: MAX_DURATION_MS + 1,
                ..AvoidanceConfig::default()
            },
            AvoidanceConfig {
                turn_ms: MAX_DURATION_MS + 1,
                ..AvoidanceConfig::default()
            },
        ] {
            assert!(matches!(
                bad.validate(),
                Err(ConfigError::DurationOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn config_from_partial_json() {
        let cfg: AvoidanceConfig =
            serde_json::from_str(r#"{"near_mm":120,"invalid_sample":"ignore"}"#).unwrap();
        assert_eq!(cfg.near_mm, 120);
        assert_eq!(cfg.far_mm, 425);
        assert_eq!(cfg.invalid_sample, InvalidSamplePolicy::Ignore);
    }
}
