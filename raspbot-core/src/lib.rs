//! Core drivers and obstacle avoidance for the Raspbot rover on no-std platforms.
//!
//! The host application lives in `raspbot-app/pi-host`.
#![no_std]

pub mod utils;

#[doc(hidden)]
pub use static_cell as __static_cell;
