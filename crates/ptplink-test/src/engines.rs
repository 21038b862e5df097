//! Reference protocol engines for exercising the platform

use ptplink_core::{ClockValue, PlatformError, PlatformResult, PtpPort, NANOS_PER_SEC};
use ptplink_runtime::{
    EngineOptions, ForeignRecordTable, PlatformServices, PortIdentity, ProtocolEngine,
};
use tracing::{debug, info, warn};

use crate::messages::{
    parse_header, AnnounceMessage, Header, MessageType, SyncMessage, ANNOUNCE_LEN, SYNC_LEN,
};

/// Records every callback; optionally echoes messages back
#[derive(Debug, Default)]
pub struct RecordingEngine {
    /// Make `startup` fail
    pub fail_startup: bool,
    /// Reply to each inbound message with a copy on this port
    pub echo_on: Option<PtpPort>,
    /// Send this payload on the event port from every periodic call
    pub periodic_payload: Option<Vec<u8>>,
    pub startups: u32,
    pub options: Option<EngineOptions>,
    pub foreign_capacity: Option<usize>,
    pub messages: Vec<Vec<u8>>,
    pub periodic_calls: u64,
    /// Clock readings taken at each periodic call
    pub periodic_clock: Vec<ClockValue>,
    pub send_errors: Vec<String>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolEngine for RecordingEngine {
    fn startup(
        &mut self,
        _platform: &mut dyn PlatformServices,
        options: &EngineOptions,
        foreign: ForeignRecordTable,
    ) -> PlatformResult<()> {
        self.startups += 1;
        self.options = Some(options.clone());
        self.foreign_capacity = Some(foreign.capacity());
        if self.fail_startup {
            return Err(PlatformError::EngineStartup("recording engine told to fail".into()));
        }
        Ok(())
    }

    fn handle_message(&mut self, payload: &[u8], platform: &mut dyn PlatformServices) {
        self.messages.push(payload.to_vec());
        if let Some(port) = self.echo_on {
            if let Err(e) = platform.send_on(port, payload) {
                self.send_errors.push(e.to_string());
            }
        }
    }

    fn periodic_handler(&mut self, platform: &mut dyn PlatformServices) {
        self.periodic_calls += 1;
        self.periodic_clock.push(platform.read_clock());
        if let Some(payload) = &self.periodic_payload {
            if let Err(e) = platform.send_event(payload) {
                self.send_errors.push(e.to_string());
            }
        }
    }
}

/// Offsets at or beyond this are stepped instead of slewed
pub const STEP_THRESHOLD_NS: i128 = NANOS_PER_SEC as i128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// Servo and message counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub syncs_sent: u64,
    pub announces_sent: u64,
    pub syncs_received: u64,
    pub announces_received: u64,
    pub steps: u64,
    pub slews: u64,
    pub rejected: u64,
}

/// Minimal one-step master / slave.
///
/// The master sends a Sync carrying its clock on every periodic call and an
/// Announce every `announce_every` calls. The slave steps its clock on
/// large offsets and otherwise slews by half the measured offset.
/// Path delay is taken as zero.
#[derive(Debug)]
pub struct SyncEngine {
    identity: PortIdentity,
    role: Role,
    options: EngineOptions,
    foreign: Option<ForeignRecordTable>,
    announce_every: u64,
    ticks: u64,
    sequence: u16,
    last_offset_ns: Option<i128>,
    stats: SyncStats,
}

impl SyncEngine {
    pub fn new(identity: PortIdentity) -> Self {
        SyncEngine {
            identity,
            role: Role::Master,
            options: EngineOptions::default(),
            foreign: None,
            announce_every: 4,
            ticks: 0,
            sequence: 0,
            last_offset_ns: None,
            stats: SyncStats::default(),
        }
    }

    pub fn with_announce_every(mut self, ticks: u64) -> Self {
        self.announce_every = ticks.max(1);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Last master-minus-slave offset measured, slave only
    pub fn last_offset_ns(&self) -> Option<i128> {
        self.last_offset_ns
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn foreign_masters(&self) -> Option<&ForeignRecordTable> {
        self.foreign.as_ref()
    }

    fn header(&mut self, message_type: MessageType, length: usize, log_interval: i8) -> Header {
        self.sequence = self.sequence.wrapping_add(1);
        Header {
            message_type,
            length: length as u16,
            domain: self.options.domain_number,
            source: self.identity,
            sequence_id: self.sequence,
            log_interval,
        }
    }

    fn send_sync(&mut self, platform: &mut dyn PlatformServices) {
        let header = self.header(MessageType::Sync, SYNC_LEN, self.options.log_sync_interval);
        let sync = SyncMessage {
            header,
            origin: platform.read_clock(),
        };
        match platform.send_event(&sync.encode()) {
            Ok(_) => self.stats.syncs_sent += 1,
            Err(e) => warn!(error = %e, "sync not sent"),
        }
    }

    fn send_announce(&mut self, platform: &mut dyn PlatformServices) {
        let header = self.header(
            MessageType::Announce,
            ANNOUNCE_LEN,
            self.options.log_announce_interval,
        );
        let mut grandmaster = [0u8; 8];
        grandmaster.copy_from_slice(&self.identity[..8]);
        let announce = AnnounceMessage {
            header,
            origin: platform.read_clock(),
            priority1: self.options.priority1,
            quality: self.options.clock_quality,
            priority2: self.options.priority2,
            grandmaster,
            steps_removed: 0,
        };
        match platform.send_general(&announce.encode()) {
            Ok(_) => self.stats.announces_sent += 1,
            Err(e) => warn!(error = %e, "announce not sent"),
        }
    }

    fn on_sync(&mut self, sync: SyncMessage, platform: &mut dyn PlatformServices) {
        self.stats.syncs_received += 1;
        let now = platform.read_clock();
        let offset = sync.origin.nanos_since(now);
        self.last_offset_ns = Some(offset);

        if offset.abs() >= STEP_THRESHOLD_NS {
            match platform.set_clock(sync.origin) {
                Ok(()) => {
                    self.stats.steps += 1;
                    info!(offset_ns = offset as i64, "clock stepped to master");
                    return;
                }
                Err(e) => {
                    self.stats.rejected += 1;
                    warn!(error = %e, "step refused, slewing instead");
                }
            }
        }

        let correction = (offset / 2).clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        platform.adjust_clock(correction);
        self.stats.slews += 1;
        debug!(offset_ns = offset as i64, correction, "clock slewed");
    }

    fn on_announce(&mut self, announce: AnnounceMessage, platform: &mut dyn PlatformServices) {
        self.stats.announces_received += 1;
        let now = platform.read_clock();
        if let Some(table) = self.foreign.as_mut() {
            table.record_announce(announce.header.source, now, &announce.encode());
        }
    }
}

impl ProtocolEngine for SyncEngine {
    fn startup(
        &mut self,
        _platform: &mut dyn PlatformServices,
        options: &EngineOptions,
        foreign: ForeignRecordTable,
    ) -> PlatformResult<()> {
        self.role = if options.slave_only {
            Role::Slave
        } else {
            Role::Master
        };
        self.options = options.clone();
        self.foreign = Some(foreign);
        info!(role = ?self.role, domain = options.domain_number, "sync engine started");
        Ok(())
    }

    fn handle_message(&mut self, payload: &[u8], platform: &mut dyn PlatformServices) {
        let Some(header) = parse_header(payload) else {
            debug!(len = payload.len(), "not a PTP message");
            return;
        };
        if header.domain != self.options.domain_number || header.source == self.identity {
            return;
        }
        if self.role != Role::Slave {
            return;
        }

        match header.message_type {
            MessageType::Sync => {
                if let Some(sync) = SyncMessage::decode(payload) {
                    self.on_sync(sync, platform);
                }
            }
            MessageType::Announce => {
                if let Some(announce) = AnnounceMessage::decode(payload) {
                    self.on_announce(announce, platform);
                }
            }
        }
    }

    fn periodic_handler(&mut self, platform: &mut dyn PlatformServices) {
        self.ticks += 1;
        if self.role != Role::Master {
            return;
        }
        if self.ticks % self.announce_every == 1 || self.announce_every == 1 {
            self.send_announce(platform);
        }
        self.send_sync(platform);
    }
}
