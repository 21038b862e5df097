//! ptplink Test Harness - Simulated hardware and end-to-end validation
//!
//! This crate provides:
//! - A simulated cascaded counter with controllable rollover timing
//! - A simulated datagram stack with fault injection and a buffer ledger
//! - Simulated interrupt controller and timer
//! - A shared multicast segment with loss and duplication
//! - Reference engines: a recorder and a minimal master/slave servo
//! - A two-node harness for end-to-end runs

pub mod board;
pub mod engines;
pub mod integration;
pub mod messages;
pub mod segment;
pub mod sim_counter;
pub mod sim_irq;
pub mod sim_stack;

pub use board::*;
pub use engines::*;
pub use integration::*;
pub use messages::*;
pub use segment::*;
pub use sim_counter::*;
pub use sim_irq::*;
pub use sim_stack::*;
