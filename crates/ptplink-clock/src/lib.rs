//! ptplink Clock - Adjustable hardware clock for the PTP engine
//!
//! This crate implements the clock side of the platform layer:
//! - A 64-bit tick source abstraction, with a rollover-safe read for
//!   counters split across two 32-bit registers
//! - `HardwareClock`: tick-to-time conversion, hard set, and slewing via a
//!   software offset
//! - `SharedClock`: a serialized handle for hosts that touch the clock from
//!   more than one thread

pub mod clock;
pub mod counter;

pub use clock::*;
pub use counter::*;
