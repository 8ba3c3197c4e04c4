//! Utility re-exports and helper macros for the Raspbot rover.
//!
//! - `controllers`: bus register protocol, motion driver, lights, IR remote and
//!   the system controller that arbitrates between manual and autonomous drive
//! - `autonomy`: the obstacle-avoidance state machine and its distance filter
//! - `clock`: monotonic time source used by every timed decision
//!
//! The `mk_static!` macro simplifies static initialization of the shared bus.

pub mod autonomy;
pub mod clock;
pub mod controllers;

pub use autonomy::avoidance::{AvoidanceConfig, ControllerState, ObstacleAvoidance};
pub use clock::{Clock, SystemClock};
pub use controllers::SystemController;
pub use embassy_time::{Duration, Instant};

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::__static_cell::StaticCell<$t> =
            $crate::__static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
