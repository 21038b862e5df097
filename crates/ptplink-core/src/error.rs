//! Error types for the PTP platform layer

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::PtpPort;

/// Platform errors, grouped by failure tier
#[derive(Error, Debug)]
pub enum PlatformError {
    // Fatal initialization errors
    #[error("Clock hardware initialization failed: {0}")]
    ClockInit(String),

    #[error("Interrupt controller {stage} failed: {reason}")]
    InterruptController { stage: &'static str, reason: String },

    #[error("Timer driver {stage} failed: {reason}")]
    TimerDriver { stage: &'static str, reason: String },

    #[error("Failed to create {port} endpoint: {reason}")]
    EndpointCreate { port: PtpPort, reason: String },

    #[error("Failed to bind {port} endpoint to port {number}: {reason}")]
    EndpointBind {
        port: PtpPort,
        number: u16,
        reason: String,
    },

    // Recoverable transport errors
    #[error("Failed to join multicast group {group}: {reason}")]
    MulticastJoin { group: Ipv4Addr, reason: String },

    #[error("Failed to allocate {len}-byte send buffer")]
    BufferAlloc { len: usize },

    #[error("Transmit failed on {port} endpoint: {reason}")]
    Transmit { port: PtpPort, reason: String },

    #[error("Transport endpoint {0} is not open")]
    EndpointClosed(PtpPort),

    // Policy errors
    #[error("Clock step rejected: servo has already slewed the clock")]
    StepRejected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Protocol engine startup failed: {0}")]
    EngineStartup(String),
}

impl PlatformError {
    /// True for errors that stop the platform from reaching its serving loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlatformError::ClockInit(_)
                | PlatformError::InterruptController { .. }
                | PlatformError::TimerDriver { .. }
                | PlatformError::EndpointCreate { .. }
                | PlatformError::EndpointBind { .. }
                | PlatformError::InvalidConfig(_)
        )
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;
