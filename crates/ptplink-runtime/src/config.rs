//! Node configuration

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use ptplink_clock::ClockConfig;
use ptplink_core::{PlatformError, PlatformResult};
use ptplink_transport::TransportConfig;

use crate::{EngineOptions, LogFormat, SchedulerConfig};

/// Static network interface settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: [u8; 6],
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::new(192, 168, 1, 10),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            mac: [0x00, 0x0a, 0x35, 0x00, 0x01, 0x02],
        }
    }
}

impl InterfaceConfig {
    pub fn validate(&self) -> PlatformResult<()> {
        if self.address.is_unspecified() || self.address.is_multicast() {
            return Err(PlatformError::InvalidConfig(format!(
                "{} is not a usable interface address",
                self.address
            )));
        }
        let mask = u32::from(self.netmask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(PlatformError::InvalidConfig(format!(
                "{} is not a contiguous netmask",
                self.netmask
            )));
        }
        Ok(())
    }

    /// Log address, netmask and gateway
    pub fn log_settings(&self) {
        info!(
            address = %self.address,
            netmask = %self.netmask,
            gateway = %self.gateway,
            "interface settings"
        );
    }
}

/// Complete node configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub clock: ClockConfig,
    pub transport: TransportConfig,
    pub scheduler: SchedulerConfig,
    pub interface: InterfaceConfig,
    pub engine: EngineOptions,
    pub log_format: LogFormat,
}

impl PlatformConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> PlatformResult<Self> {
        serde_json::from_str(json).map_err(|e| PlatformError::InvalidConfig(e.to_string()))
    }

    /// Read and parse a JSON file
    pub fn load(path: impl AsRef<Path>) -> PlatformResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            PlatformError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> PlatformResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PlatformError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> PlatformResult<()> {
        self.clock.validate()?;
        self.transport.validate()?;
        self.scheduler.validate()?;
        self.interface.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}
