//! Contracts between the platform and the PTP protocol engine
//!
//! The engine owns message formats, the port state machine, best-master
//! selection and the servo. The platform gives it a clock, two senders and a
//! place to keep foreign master records, and calls it back on every inbound
//! datagram and on every periodic tick.

use serde::{Deserialize, Serialize};

use ptplink_core::{ClockValue, PlatformError, PlatformResult, PtpSender};

/// Everything the engine may do to the platform
pub trait PlatformServices: PtpSender {
    fn read_clock(&mut self) -> ClockValue;

    /// Step the clock. Subject to the clock's step policy.
    fn set_clock(&mut self, value: ClockValue) -> PlatformResult<()>;

    /// Slew the clock by a signed nanosecond delta
    fn adjust_clock(&mut self, delta_ns: i64);
}

/// A PTP protocol engine driven by the dispatch loop
pub trait ProtocolEngine {
    /// Called once during bootstrap, after the transport is open. The
    /// engine takes ownership of the foreign master table.
    fn startup(
        &mut self,
        platform: &mut dyn PlatformServices,
        options: &EngineOptions,
        foreign: ForeignRecordTable,
    ) -> PlatformResult<()>;

    /// One inbound datagram, event or general, in arrival order
    fn handle_message(&mut self, payload: &[u8], platform: &mut dyn PlatformServices);

    /// Once per consumed tick
    fn periodic_handler(&mut self, platform: &mut dyn PlatformServices);
}

/// Advertised clock quality
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

impl Default for ClockQuality {
    fn default() -> Self {
        // Default-profile slave-capable ordinary clock, accuracy unknown
        Self {
            clock_class: 248,
            clock_accuracy: 0xFE,
            offset_scaled_log_variance: 0xFFFF,
        }
    }
}

/// Engine run-time options, handed over at startup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub slave_only: bool,
    pub domain_number: u8,
    /// log2 seconds between Sync messages
    pub log_sync_interval: i8,
    /// log2 seconds between Announce messages
    pub log_announce_interval: i8,
    pub announce_receipt_timeout: u8,
    pub priority1: u8,
    pub priority2: u8,
    pub clock_quality: ClockQuality,
    /// Capacity of the foreign master table
    pub max_foreign_records: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            slave_only: false,
            domain_number: 0,
            log_sync_interval: 1,
            log_announce_interval: 1,
            announce_receipt_timeout: 3,
            priority1: 128,
            priority2: 128,
            clock_quality: ClockQuality::default(),
            max_foreign_records: 5,
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> PlatformResult<()> {
        if self.max_foreign_records == 0 {
            return Err(PlatformError::InvalidConfig(
                "foreign master table needs at least one record".into(),
            ));
        }
        if self.announce_receipt_timeout < 2 {
            return Err(PlatformError::InvalidConfig(format!(
                "announce receipt timeout {} is below 2 intervals",
                self.announce_receipt_timeout
            )));
        }
        Ok(())
    }
}

/// Identity of a remote PTP port: clock identity plus port number
pub type PortIdentity = [u8; 10];

/// One candidate master seen on the network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignMasterRecord {
    pub port_identity: PortIdentity,
    /// Announce messages counted in the current qualification window
    pub announce_messages: u32,
    pub last_seen: ClockValue,
    /// Last Announce body, kept for best-master comparison
    pub announce: Vec<u8>,
}

/// Fixed-capacity store of foreign master records.
///
/// Once full, a new master overwrites the slot after the most recently
/// written one, cycling through the table.
#[derive(Clone, Debug)]
pub struct ForeignRecordTable {
    records: Vec<ForeignMasterRecord>,
    capacity: usize,
    cursor: usize,
}

impl ForeignRecordTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count an Announce from `identity`, inserting or recycling a slot as
    /// needed. Returns the slot index.
    pub fn record_announce(
        &mut self,
        identity: PortIdentity,
        now: ClockValue,
        announce: &[u8],
    ) -> usize {
        if let Some(index) = self.position(&identity) {
            let record = &mut self.records[index];
            record.announce_messages = record.announce_messages.saturating_add(1);
            record.last_seen = now;
            record.announce.clear();
            record.announce.extend_from_slice(announce);
            return index;
        }

        let record = ForeignMasterRecord {
            port_identity: identity,
            announce_messages: 1,
            last_seen: now,
            announce: announce.to_vec(),
        };

        let index = if self.records.len() < self.capacity {
            self.records.push(record);
            self.records.len() - 1
        } else {
            let index = self.cursor;
            self.records[index] = record;
            index
        };
        self.cursor = (index + 1) % self.capacity;
        index
    }

    pub fn get(&self, identity: &PortIdentity) -> Option<&ForeignMasterRecord> {
        self.position(identity).map(|i| &self.records[i])
    }

    pub fn remove(&mut self, identity: &PortIdentity) -> Option<ForeignMasterRecord> {
        let index = self.position(identity)?;
        let record = self.records.remove(index);
        if self.cursor > index {
            self.cursor -= 1;
        }
        Some(record)
    }

    /// Start a new qualification window
    pub fn reset_counts(&mut self) {
        for record in &mut self.records {
            record.announce_messages = 0;
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.cursor = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForeignMasterRecord> {
        self.records.iter()
    }

    fn position(&self, identity: &PortIdentity) -> Option<usize> {
        self.records.iter().position(|r| &r.port_identity == identity)
    }
}
