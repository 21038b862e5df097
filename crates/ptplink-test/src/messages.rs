//! Minimal PTPv2 message codec for the reference engines
//!
//! Only Sync and Announce, only the fields the reference servo reads.

use ptplink_core::ClockValue;
use ptplink_runtime::{ClockQuality, PortIdentity};

pub const HEADER_LEN: usize = 34;
pub const SYNC_LEN: usize = 44;
pub const ANNOUNCE_LEN: usize = 64;

const PTP_VERSION: u8 = 2;

/// Message types the codec understands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Sync,
    Announce,
}

impl MessageType {
    fn code(self) -> u8 {
        match self {
            MessageType::Sync => 0x0,
            MessageType::Announce => 0xB,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            0x0 => Some(MessageType::Sync),
            0xB => Some(MessageType::Announce),
            _ => None,
        }
    }
}

/// Common header fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub length: u16,
    pub domain: u8,
    pub source: PortIdentity,
    pub sequence_id: u16,
    pub log_interval: i8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncMessage {
    pub header: Header,
    pub origin: ClockValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub header: Header,
    pub origin: ClockValue,
    pub priority1: u8,
    pub quality: ClockQuality,
    pub priority2: u8,
    pub grandmaster: [u8; 8],
    pub steps_removed: u16,
}

fn write_header(buf: &mut [u8], header: &Header) {
    buf[0] = header.message_type.code();
    buf[1] = PTP_VERSION;
    buf[2..4].copy_from_slice(&header.length.to_be_bytes());
    buf[4] = header.domain;
    buf[20..30].copy_from_slice(&header.source);
    buf[30..32].copy_from_slice(&header.sequence_id.to_be_bytes());
    buf[32] = match header.message_type {
        MessageType::Sync => 0,
        MessageType::Announce => 5,
    };
    buf[33] = header.log_interval as u8;
}

fn write_timestamp(buf: &mut [u8], value: ClockValue) {
    let seconds = value.seconds().to_be_bytes();
    buf[0..6].copy_from_slice(&seconds[2..8]);
    buf[6..10].copy_from_slice(&value.nanoseconds().to_be_bytes());
}

fn read_timestamp(buf: &[u8]) -> ClockValue {
    let mut seconds = [0u8; 8];
    seconds[2..8].copy_from_slice(&buf[0..6]);
    let nanos = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
    ClockValue::new(u64::from_be_bytes(seconds), nanos)
}

/// Parse and check the common header
pub fn parse_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < HEADER_LEN || buf[1] & 0x0F != PTP_VERSION {
        return None;
    }
    let message_type = MessageType::from_code(buf[0])?;
    let length = u16::from_be_bytes([buf[2], buf[3]]);
    if usize::from(length) > buf.len() {
        return None;
    }
    let mut source = [0u8; 10];
    source.copy_from_slice(&buf[20..30]);

    Some(Header {
        message_type,
        length,
        domain: buf[4],
        source,
        sequence_id: u16::from_be_bytes([buf[30], buf[31]]),
        log_interval: buf[33] as i8,
    })
}

impl SyncMessage {
    pub fn encode(&self) -> [u8; SYNC_LEN] {
        let mut buf = [0u8; SYNC_LEN];
        write_header(&mut buf, &self.header);
        write_timestamp(&mut buf[34..44], self.origin);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let header = parse_header(buf)?;
        if header.message_type != MessageType::Sync || buf.len() < SYNC_LEN {
            return None;
        }
        Some(SyncMessage {
            header,
            origin: read_timestamp(&buf[34..44]),
        })
    }
}

impl AnnounceMessage {
    pub fn encode(&self) -> [u8; ANNOUNCE_LEN] {
        let mut buf = [0u8; ANNOUNCE_LEN];
        write_header(&mut buf, &self.header);
        write_timestamp(&mut buf[34..44], self.origin);
        buf[47] = self.priority1;
        buf[48] = self.quality.clock_class;
        buf[49] = self.quality.clock_accuracy;
        buf[50..52].copy_from_slice(&self.quality.offset_scaled_log_variance.to_be_bytes());
        buf[52] = self.priority2;
        buf[53..61].copy_from_slice(&self.grandmaster);
        buf[61..63].copy_from_slice(&self.steps_removed.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let header = parse_header(buf)?;
        if header.message_type != MessageType::Announce || buf.len() < ANNOUNCE_LEN {
            return None;
        }
        let mut grandmaster = [0u8; 8];
        grandmaster.copy_from_slice(&buf[53..61]);
        Some(AnnounceMessage {
            header,
            origin: read_timestamp(&buf[34..44]),
            priority1: buf[47],
            quality: ClockQuality {
                clock_class: buf[48],
                clock_accuracy: buf[49],
                offset_scaled_log_variance: u16::from_be_bytes([buf[50], buf[51]]),
            },
            priority2: buf[52],
            grandmaster,
            steps_removed: u16::from_be_bytes([buf[61], buf[62]]),
        })
    }
}
