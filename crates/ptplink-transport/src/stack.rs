//! Network stack contract
//!
//! The transport does not own sockets directly; it drives whatever datagram
//! stack the board provides through this trait. The shape follows a small
//! embedded IP stack: endpoints are created then bound, multicast membership
//! is per interface, send buffers are allocated and released explicitly, and
//! input is polled rather than pushed.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

/// Stack-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("address in use")]
    AddrInUse,

    #[error("no route to host")]
    Routing,

    #[error("interface error: {0}")]
    Interface(String),

    #[error("unknown endpoint")]
    UnknownEndpoint,

    #[error("i/o error: {0}")]
    Io(String),
}

/// Datagram stack primitives the transport is built on
pub trait NetworkStack {
    /// Handle to one datagram endpoint
    type Endpoint: Copy + Eq + fmt::Debug;
    /// A received datagram, owned by the stack until released
    type Datagram: AsRef<[u8]>;
    /// A transient send buffer
    type TxBuffer: AsRef<[u8]> + AsMut<[u8]>;

    /// Create an unbound endpoint
    fn create_endpoint(&mut self) -> Result<Self::Endpoint, StackError>;

    /// Bind an endpoint to a local address
    fn bind(&mut self, endpoint: Self::Endpoint, addr: SocketAddrV4) -> Result<(), StackError>;

    /// Release an endpoint and anything queued on it
    fn release_endpoint(&mut self, endpoint: Self::Endpoint);

    /// Address of the default network interface
    fn default_interface(&self) -> Ipv4Addr;

    /// Join a multicast group on the interface with address `interface`
    fn join_group(&mut self, interface: Ipv4Addr, group: Ipv4Addr) -> Result<(), StackError>;

    /// Allocate a send buffer of exactly `len` bytes
    fn alloc_tx(&mut self, len: usize) -> Result<Self::TxBuffer, StackError>;

    /// Transmit the whole buffer from `endpoint` to `dest`
    fn send_to(
        &mut self,
        endpoint: Self::Endpoint,
        buffer: &Self::TxBuffer,
        dest: SocketAddrV4,
    ) -> Result<(), StackError>;

    /// Return a send buffer to the stack
    fn free_tx(&mut self, buffer: Self::TxBuffer);

    /// Move arrived frames from the interface into endpoint queues.
    /// Never blocks.
    fn poll_input(&mut self);

    /// Take the next datagram queued on `endpoint`, if any. Never blocks.
    fn recv(&mut self, endpoint: Self::Endpoint) -> Option<Self::Datagram>;

    /// Return a received datagram to the stack
    fn release_datagram(&mut self, datagram: Self::Datagram);

    /// Run the stack's own pending timers (retransmission, ARP, ...)
    fn service_timers(&mut self) {}
}
