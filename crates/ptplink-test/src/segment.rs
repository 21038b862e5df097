//! Shared multicast segment between simulated stations
//!
//! Simulates an imperfect LAN:
//! - Packet loss
//! - Duplication
//! - Reordering within a station's inbox

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Segment impairment configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ChaosConfig {
    /// Per-receiver loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Per-receiver duplicate probability
    pub duplicate_prob: f64,
    /// Probability a frame overtakes the one queued before it
    pub reorder_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::perfect()
    }
}

impl ChaosConfig {
    /// Lossless, in-order delivery
    pub fn perfect() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
        }
    }

    /// A busy office switch
    pub fn lossy() -> Self {
        ChaosConfig {
            loss_rate: 0.05,
            duplicate_prob: 0.01,
            reorder_prob: 0.02,
        }
    }

    /// Badly congested link
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.3,
            duplicate_prob: 0.05,
            reorder_prob: 0.1,
        }
    }
}

/// A frame on the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub src: SocketAddrV4,
    pub dest: SocketAddrV4,
    pub payload: Vec<u8>,
}

/// Station index on a segment
pub type StationId = usize;

/// Segment statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub frames_duplicated: u64,
    pub frames_reordered: u64,
}

impl SegmentStats {
    pub fn loss_rate(&self) -> f64 {
        let attempts = self.frames_delivered + self.frames_lost;
        if attempts == 0 {
            0.0
        } else {
            self.frames_lost as f64 / attempts as f64
        }
    }
}

struct Station {
    address: Ipv4Addr,
    groups: Vec<Ipv4Addr>,
    inbox: VecDeque<Frame>,
}

struct SegmentInner {
    chaos: ChaosConfig,
    rng: StdRng,
    stations: Vec<Station>,
    /// Every frame transmitted, in order
    captured: Vec<Frame>,
    stats: SegmentStats,
}

impl SegmentInner {
    fn deliver(&mut self, to: StationId, frame: &Frame) {
        if self.rng.gen::<f64>() < self.chaos.loss_rate {
            self.stats.frames_lost += 1;
            return;
        }

        let copies = if self.rng.gen::<f64>() < self.chaos.duplicate_prob {
            self.stats.frames_duplicated += 1;
            2
        } else {
            1
        };

        let reorder = self.rng.gen::<f64>() < self.chaos.reorder_prob;
        let inbox = &mut self.stations[to].inbox;
        for _ in 0..copies {
            if reorder && !inbox.is_empty() {
                let at = inbox.len() - 1;
                inbox.insert(at, frame.clone());
                self.stats.frames_reordered += 1;
            } else {
                inbox.push_back(frame.clone());
            }
            self.stats.frames_delivered += 1;
        }
    }
}

/// Cloneable handle to one broadcast domain
#[derive(Clone)]
pub struct Segment {
    inner: Arc<Mutex<SegmentInner>>,
}

impl Segment {
    /// Create a segment with seeded impairments
    pub fn new(chaos: ChaosConfig, seed: u64) -> Self {
        Segment {
            inner: Arc::new(Mutex::new(SegmentInner {
                chaos,
                rng: StdRng::seed_from_u64(seed),
                stations: Vec::new(),
                captured: Vec::new(),
                stats: SegmentStats::default(),
            })),
        }
    }

    pub fn perfect() -> Self {
        Self::new(ChaosConfig::perfect(), 0)
    }

    /// Attach a station with unicast address `address`
    pub fn attach(&self, address: Ipv4Addr) -> StationId {
        let mut inner = self.inner.lock();
        inner.stations.push(Station {
            address,
            groups: Vec::new(),
            inbox: VecDeque::new(),
        });
        inner.stations.len() - 1
    }

    /// Subscribe a station to a multicast group
    pub fn join(&self, station: StationId, group: Ipv4Addr) {
        let mut inner = self.inner.lock();
        let groups = &mut inner.stations[station].groups;
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    /// Send a frame from `from` to every other station that accepts its
    /// destination address
    pub fn transmit(&self, from: StationId, frame: Frame) {
        let mut inner = self.inner.lock();
        inner.stats.frames_sent += 1;

        let dest = *frame.dest.ip();
        let receivers: Vec<StationId> = inner
            .stations
            .iter()
            .enumerate()
            .filter(|(id, station)| {
                *id != from
                    && if dest.is_multicast() {
                        station.groups.contains(&dest)
                    } else {
                        station.address == dest
                    }
            })
            .map(|(id, _)| id)
            .collect();

        for to in receivers {
            inner.deliver(to, &frame);
        }
        tracing::trace!(src = %frame.src, dest = %frame.dest, len = frame.payload.len(), "frame on segment");
        inner.captured.push(frame);
    }

    /// Place a frame straight into a station's inbox, bypassing impairments
    pub fn inject(&self, station: StationId, frame: Frame) {
        self.inner.lock().stations[station].inbox.push_back(frame);
    }

    /// Take everything waiting for `station`
    pub fn drain_inbox(&self, station: StationId) -> Vec<Frame> {
        self.inner.lock().stations[station].inbox.drain(..).collect()
    }

    /// Groups `station` has joined
    pub fn groups(&self, station: StationId) -> Vec<Ipv4Addr> {
        self.inner.lock().stations[station].groups.clone()
    }

    /// Snapshot of every frame transmitted so far
    pub fn captured(&self) -> Vec<Frame> {
        self.inner.lock().captured.clone()
    }

    pub fn stats(&self) -> SegmentStats {
        self.inner.lock().stats.clone()
    }
}
