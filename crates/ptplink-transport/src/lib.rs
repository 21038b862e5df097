//! ptplink Transport - Multicast datagram transport for the PTP engine
//!
//! This crate provides:
//! - The `NetworkStack` contract the transport runs on (endpoints, multicast
//!   membership, send buffers, non-blocking receive)
//! - `NetworkTransport`: event + general endpoints feeding one ingestion path
//! - `TokioStack`: a host backend over tokio UDP sockets

pub mod host;
pub mod stack;
pub mod transport;

pub use host::{HostEndpoint, TokioStack};
pub use stack::*;
pub use transport::*;
