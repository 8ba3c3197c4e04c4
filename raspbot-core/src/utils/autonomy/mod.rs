//! Autonomous driving for the Raspbot rover.
//!
//! This module provides the obstacle-avoidance state machine and the rolling
//! distance filter it decides on.

pub mod avoidance;
pub mod history;
