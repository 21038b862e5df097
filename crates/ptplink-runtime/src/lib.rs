//! ptplink Runtime - Node bootstrap and the cooperative dispatch loop
//!
//! This crate ties the platform together:
//! - `TickFlag`: the single-slot handoff between the timer interrupt and the
//!   main loop
//! - `TimerScheduler`: programs the periodic interrupt
//! - `ProtocolEngine` / `PlatformServices`: the contracts between the core and
//!   the PTP engine
//! - `Node`: bootstrap sequence and the dispatch loop (stack timers, network
//!   poll, periodic handler)

pub mod config;
pub mod engine;
pub mod logging;
pub mod node;
pub mod scheduler;
pub mod services;
pub mod tick;

pub use config::*;
pub use engine::*;
pub use logging::*;
pub use node::*;
pub use scheduler::*;
pub use services::*;
pub use tick::*;
