//! ptplink Core - Fundamental types shared by the platform layer
//!
//! This crate defines the types used across the PTP platform crates:
//! - Clock values (seconds + normalized nanoseconds)
//! - The platform error taxonomy (fatal vs recoverable)
//! - Fixed PTP network parameters (ports, multicast groups)
//! - The outbound send capability handed to the protocol engine

pub mod error;
pub mod net;
pub mod time;

pub use error::*;
pub use net::*;
pub use time::*;
