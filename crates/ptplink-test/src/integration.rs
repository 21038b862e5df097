//! End-to-end Integration Test Suite
//!
//! Runs complete nodes on simulated boards:
//! - Bootstrap success and failure tiers
//! - Datagram delivery and buffer release
//! - Tick coalescing
//! - Master/slave convergence over a lossy segment

use std::net::Ipv4Addr;

use ptplink_clock::StepPolicy;
use ptplink_core::{ClockValue, PlatformResult};
use ptplink_runtime::{Node, PlatformConfig};

use crate::{BoardProbe, ChaosConfig, Segment, SimBoard, SyncEngine};

pub const MASTER_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub const SLAVE_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 11);

/// Two-node scenario parameters
#[derive(Clone, Debug)]
pub struct PairConfig {
    pub chaos: ChaosConfig,
    pub seed: u64,
    /// Counter ticks the master is ahead of the slave at start
    pub master_lead_ticks: u64,
    pub slave_step_policy: StepPolicy,
    /// Base configuration for both nodes
    pub platform: PlatformConfig,
}

impl Default for PairConfig {
    fn default() -> Self {
        PairConfig {
            chaos: ChaosConfig::perfect(),
            seed: 1,
            master_lead_ticks: 0,
            slave_step_policy: StepPolicy::WarnAfterSlew,
            platform: PlatformConfig::default(),
        }
    }
}

/// A master and a slave on one segment, driven in lock step
pub struct SimPair {
    segment: Segment,
    master: Node<SimBoard, SyncEngine>,
    slave: Node<SimBoard, SyncEngine>,
    master_probe: BoardProbe,
    slave_probe: BoardProbe,
    ticks_per_period: u64,
}

fn identity(address: Ipv4Addr) -> [u8; 10] {
    let [a, b, c, d] = address.octets();
    [0x00, 0x0a, 0x35, 0xff, 0xfe, a ^ b, c, d, 0x00, 0x01]
}

impl SimPair {
    pub fn new(config: PairConfig) -> PlatformResult<Self> {
        let segment = Segment::new(config.chaos.clone(), config.seed);

        let mut master_config = config.platform.clone();
        master_config.interface.address = MASTER_ADDRESS;
        master_config.engine.slave_only = false;

        let mut slave_config = config.platform.clone();
        slave_config.interface.address = SLAVE_ADDRESS;
        slave_config.engine.slave_only = true;
        slave_config.clock.step_policy = config.slave_step_policy;

        let ticks_per_period = config.platform.clock.frequency_hz
            / u64::from(config.platform.scheduler.rate_hz.max(1));

        let master_board = SimBoard::new(&segment, MASTER_ADDRESS);
        let master_probe = master_board.probe();
        let master = Node::start(
            master_board,
            SyncEngine::new(identity(MASTER_ADDRESS)),
            master_config,
        )?;

        let slave_board = SimBoard::new(&segment, SLAVE_ADDRESS);
        let slave_probe = slave_board.probe();
        let slave = Node::start(
            slave_board,
            SyncEngine::new(identity(SLAVE_ADDRESS)),
            slave_config,
        )?;

        master_probe.counter.advance(config.master_lead_ticks);

        Ok(SimPair {
            segment,
            master,
            slave,
            master_probe,
            slave_probe,
            ticks_per_period,
        })
    }

    /// One tick period: time advances on both boards, both timers fire,
    /// then each node runs one loop pass
    pub fn step(&mut self) {
        self.master_probe.counter.advance(self.ticks_per_period);
        self.slave_probe.counter.advance(self.ticks_per_period);
        self.master_probe.irq.fire();
        self.slave_probe.irq.fire();
        self.master.run_once();
        self.slave.run_once();
    }

    pub fn run(&mut self, periods: usize) {
        for _ in 0..periods {
            self.step();
        }
    }

    /// Master time minus slave time, read at the same instant
    pub fn offset_ns(&mut self) -> i128 {
        let master = self.master.clock_mut().read();
        let slave = self.slave.clock_mut().read();
        master.nanos_since(slave)
    }

    pub fn master_time(&mut self) -> ClockValue {
        self.master.clock_mut().read()
    }

    pub fn master(&self) -> &Node<SimBoard, SyncEngine> {
        &self.master
    }

    pub fn slave(&self) -> &Node<SimBoard, SyncEngine> {
        &self.slave
    }

    pub fn master_probe(&self) -> &BoardProbe {
        &self.master_probe
    }

    pub fn slave_probe(&self) -> &BoardProbe {
        &self.slave_probe
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn shutdown(&mut self) {
        self.master.shutdown();
        self.slave.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddrV4;

    use ptplink_core::{
        PlatformError, PtpPort, PtpSender, PTP_EVENT_PORT, PTP_GENERAL_PORT,
        PTP_PEER_MULTICAST, PTP_PRIMARY_MULTICAST,
    };
    use ptplink_runtime::{PlatformServices, TickState};

    use crate::{IrqFaults, RecordingEngine, Role, StackFaults};

    const PEER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 99), 319);

    fn start(board: SimBoard, engine: RecordingEngine) -> Node<SimBoard, RecordingEngine> {
        match Node::start(board, engine, PlatformConfig::default()) {
            Ok(node) => node,
            Err(e) => panic!("node failed to start: {e}"),
        }
    }

    fn start_err(board: SimBoard) -> PlatformError {
        match Node::start(board, RecordingEngine::new(), PlatformConfig::default()) {
            Ok(_) => panic!("node started on a broken board"),
            Err(e) => e,
        }
    }

    // ========================================================================
    // BOOTSTRAP
    // ========================================================================

    #[test]
    fn test_bootstrap_opens_well_known_ports_and_groups() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS);
        let node = start(board, RecordingEngine::new());

        let stack = node.transport().stack();
        assert_eq!(stack.bound_ports(), vec![PTP_EVENT_PORT, PTP_GENERAL_PORT]);
        assert_eq!(
            segment.groups(stack.station()),
            vec![PTP_PRIMARY_MULTICAST, PTP_PEER_MULTICAST]
        );

        let engine = node.engine();
        assert_eq!(engine.startups, 1);
        assert_eq!(engine.foreign_capacity, Some(5));
        assert_eq!(engine.options.as_ref().map(|o| o.priority1), Some(128));
        assert!(node.stats().engine_started);
        assert_eq!(node.scheduler().timer().reload(), Some(10_000_000));
    }

    #[test]
    fn test_engine_startup_failure_is_not_fatal() {
        let segment = Segment::perfect();
        let engine = RecordingEngine {
            fail_startup: true,
            ..Default::default()
        };
        let mut node = start(SimBoard::new(&segment, MASTER_ADDRESS), engine);

        assert!(!node.stats().engine_started);
        assert!(node.transport().is_open());

        let probe_line = node.scheduler().controller().line();
        probe_line.fire();
        node.run_once();
        assert_eq!(node.engine().periodic_calls, 1);
    }

    #[test]
    fn test_clock_failure_aborts_start() {
        let segment = Segment::perfect();
        let err = start_err(SimBoard::new(&segment, MASTER_ADDRESS).with_broken_counter());
        assert!(matches!(err, PlatformError::ClockInit(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_interrupt_failures_abort_start() {
        let segment = Segment::perfect();

        let err = start_err(SimBoard::new(&segment, MASTER_ADDRESS).with_irq_faults(IrqFaults {
            fail_connect: true,
            ..Default::default()
        }));
        assert!(matches!(
            err,
            PlatformError::InterruptController { stage: "connect", .. }
        ));

        let err = start_err(SimBoard::new(&segment, SLAVE_ADDRESS).with_broken_timer());
        assert!(matches!(err, PlatformError::TimerDriver { .. }));
    }

    #[test]
    fn test_endpoint_failures_abort_start() {
        let segment = Segment::perfect();

        let err = start_err(SimBoard::new(&segment, MASTER_ADDRESS).with_stack_faults(
            StackFaults {
                fail_create_at: Some(0),
                ..Default::default()
            },
        ));
        assert!(matches!(
            err,
            PlatformError::EndpointCreate {
                port: PtpPort::Event,
                ..
            }
        ));

        let err = start_err(SimBoard::new(&segment, SLAVE_ADDRESS).with_stack_faults(
            StackFaults {
                fail_bind_port: Some(PTP_GENERAL_PORT),
                ..Default::default()
            },
        ));
        assert!(matches!(
            err,
            PlatformError::EndpointBind {
                port: PtpPort::General,
                number: 320,
                ..
            }
        ));
    }

    #[test]
    fn test_multicast_join_failure_is_soft() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS).with_stack_faults(StackFaults {
            fail_join: true,
            ..Default::default()
        });
        let node = start(board, RecordingEngine::new());

        assert!(node.transport().is_open());
        assert!(node.transport().memberships().is_empty());
        assert_eq!(node.transport().stats().join_failures, 2);
    }

    // ========================================================================
    // DISPATCH LOOP
    // ========================================================================

    #[test]
    fn test_single_datagram_delivered_once_and_released() {
        let segment = Segment::perfect();
        let mut node = start(SimBoard::new(&segment, MASTER_ADDRESS), RecordingEngine::new());

        let payload: Vec<u8> = (0..44).collect();
        node.transport().stack().inject(
            PEER,
            SocketAddrV4::new(PTP_PRIMARY_MULTICAST, PTP_EVENT_PORT),
            &payload,
        );

        let pass = node.run_once();
        assert_eq!(pass.datagrams, 1);
        assert!(!pass.ticked);
        assert_eq!(node.engine().messages, vec![payload]);

        node.run_once();
        assert_eq!(node.engine().messages.len(), 1);

        let ledger = node.transport().stack().ledger();
        assert_eq!(ledger.rx_delivered, 1);
        assert_eq!(ledger.outstanding_rx(), 0);
    }

    #[test]
    fn test_event_and_general_share_one_handler() {
        let segment = Segment::perfect();
        let mut node = start(SimBoard::new(&segment, MASTER_ADDRESS), RecordingEngine::new());
        let stack = node.transport().stack();
        stack.inject(PEER, SocketAddrV4::new(PTP_PRIMARY_MULTICAST, PTP_GENERAL_PORT), &[2; 64]);
        stack.inject(PEER, SocketAddrV4::new(PTP_PRIMARY_MULTICAST, PTP_EVENT_PORT), &[1; 44]);

        assert_eq!(node.run_once().datagrams, 2);
        let lengths: Vec<usize> = node.engine().messages.iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![44, 64]);
        assert_eq!(node.stats().datagrams_in, 2);
    }

    #[test]
    fn test_interrupts_coalesce_into_one_periodic_call() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS);
        let probe = board.probe();
        let mut node = start(board, RecordingEngine::new());

        probe.irq.fire();
        probe.irq.fire();
        assert_eq!(node.scheduler().state(), TickState::Pending);

        assert!(node.run_once().ticked);
        assert!(!node.run_once().ticked);
        assert_eq!(node.engine().periodic_calls, 1);
        assert_eq!(probe.irq.delivered(), 2);
        assert_eq!(node.scheduler().state(), TickState::Armed);
    }

    #[test]
    fn test_idle_loop_services_stack_timers_only() {
        let segment = Segment::perfect();
        let mut node = start(SimBoard::new(&segment, MASTER_ADDRESS), RecordingEngine::new());

        let stats = node.run_for(100);
        assert_eq!(stats.iterations, 100);
        assert_eq!(stats.periodic_runs, 0);
        assert_eq!(node.transport().stack().timer_services(), 100);
        assert!(node.engine().messages.is_empty());
    }

    #[test]
    fn test_periodic_send_goes_to_primary_group() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS);
        let probe = board.probe();
        let engine = RecordingEngine {
            periodic_payload: Some(vec![0xAB; 44]),
            ..Default::default()
        };
        let mut node = start(board, engine);

        probe.irq.fire();
        node.run_once();

        let frames = segment.captured();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].dest,
            SocketAddrV4::new(PTP_PRIMARY_MULTICAST, PTP_EVENT_PORT)
        );
        assert_eq!(frames[0].src.port(), PTP_EVENT_PORT);
        assert_eq!(frames[0].payload.len(), 44);
        assert_eq!(node.transport().stack().ledger().outstanding_tx(), 0);
    }

    #[test]
    fn test_engine_replies_while_handling() {
        let segment = Segment::perfect();
        let engine = RecordingEngine {
            echo_on: Some(PtpPort::General),
            ..Default::default()
        };
        let mut node = start(SimBoard::new(&segment, MASTER_ADDRESS), engine);

        node.transport().stack().inject(
            PEER,
            SocketAddrV4::new(PTP_PRIMARY_MULTICAST, PTP_EVENT_PORT),
            &[5; 44],
        );
        node.run_once();

        let frames = segment.captured();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].dest,
            SocketAddrV4::new(PTP_PRIMARY_MULTICAST, PTP_GENERAL_PORT)
        );
        assert!(node.engine().send_errors.is_empty());
    }

    #[test]
    fn test_transmit_failure_is_reported_not_fatal() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS).with_stack_faults(StackFaults {
            fail_transmit: true,
            ..Default::default()
        });
        let probe = board.probe();
        let engine = RecordingEngine {
            periodic_payload: Some(vec![0; 44]),
            ..Default::default()
        };
        let mut node = start(board, engine);

        probe.irq.fire();
        node.run_once();
        probe.irq.fire();
        node.run_once();

        assert_eq!(node.engine().send_errors.len(), 2);
        assert_eq!(node.transport().stats().send_failures, 2);
        assert!(segment.captured().is_empty());
        assert_eq!(node.transport().stack().ledger().outstanding_tx(), 0);
    }

    #[test]
    fn test_alloc_failure_fails_both_sends_without_transmitting() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS).with_stack_faults(StackFaults {
            fail_alloc: true,
            ..Default::default()
        });
        let mut node = start(board, RecordingEngine::new());

        let (event, general) = node.with_services(|services| {
            (services.send_event(&[0; 44]), services.send_general(&[0; 64]))
        });

        assert!(matches!(event, Err(PlatformError::BufferAlloc { len: 44 })));
        assert!(matches!(general, Err(PlatformError::BufferAlloc { len: 64 })));
        assert!(segment.captured().is_empty());
        assert_eq!(node.transport().stats().send_failures, 2);
        assert_eq!(node.transport().stats().frames_out, 0);
        assert_eq!(node.transport().stack().ledger().outstanding_tx(), 0);
        assert_eq!(node.transport().stack().ledger().tx_allocated, 0);

        // The loop keeps running
        node.run_once();
        assert!(node.transport().is_open());
    }

    #[test]
    fn test_services_expose_clock_and_senders() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS);
        let probe = board.probe();
        let mut node = start(board, RecordingEngine::new());

        probe.counter.advance(150_000_000);
        let now = node.with_services(|services| services.read_clock());
        assert_eq!(now, ClockValue::new(1, 500_000_000));

        node.with_services(|services| {
            services.adjust_clock(-500_000_000);
            assert_eq!(services.read_clock(), ClockValue::new(1, 0));
            services.set_clock(ClockValue::new(100, 0)).unwrap();
            assert_eq!(services.send_general(&[0; 64]).unwrap(), 64);
        });
        assert_eq!(node.clock().slew_offset(), 0);
        assert_eq!(node.clock_mut().read(), ClockValue::new(100, 0));
    }

    #[test]
    fn test_rollover_during_periodic_read() {
        let segment = Segment::perfect();
        let board = SimBoard::new(&segment, MASTER_ADDRESS);
        let probe = board.probe();
        let mut node = start(board, RecordingEngine::new());

        probe.counter.place(0xFFFF_FFFE);
        probe.counter.set_step_per_read(1);

        probe.irq.fire();
        node.run_once();
        probe.irq.fire();
        node.run_once();

        let readings = &node.engine().periodic_clock;
        assert_eq!(readings.len(), 2);
        assert!(readings[0].as_nanos() >= (1u128 << 32) * 10);
        assert!(readings[1] > readings[0]);
        assert_eq!(node.clock().source().retries(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let segment = Segment::perfect();
        let mut node = start(SimBoard::new(&segment, MASTER_ADDRESS), RecordingEngine::new());

        node.shutdown();
        node.shutdown();
        assert_eq!(node.transport().stack().live_endpoints(), 0);

        let sent = node.with_services(|services| services.send_event(&[0; 44]));
        assert!(matches!(
            sent,
            Err(PlatformError::EndpointClosed(PtpPort::Event))
        ));
    }

    // ========================================================================
    // MASTER / SLAVE
    // ========================================================================

    #[test]
    fn test_slave_slews_to_master() {
        let mut pair = SimPair::new(PairConfig {
            master_lead_ticks: 40_000_000,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(pair.offset_ns(), 400_000_000);

        pair.run(40);

        assert!(pair.offset_ns().abs() < 1_000, "offset {}", pair.offset_ns());
        let slave = pair.slave().engine();
        assert_eq!(slave.role(), Role::Slave);
        assert_eq!(slave.stats().steps, 0);
        assert!(slave.stats().slews >= 40);
        assert_eq!(pair.master().engine().stats().syncs_sent, 40);

        let foreign = slave.foreign_masters().unwrap();
        assert_eq!(foreign.len(), 1);
        assert_eq!(foreign.iter().next().map(|r| r.announce_messages), Some(10));
    }

    #[test]
    fn test_slave_steps_on_large_offset() {
        let mut pair = SimPair::new(PairConfig {
            master_lead_ticks: 500_000_000,
            ..Default::default()
        })
        .unwrap();

        pair.run(3);

        assert!(pair.offset_ns().abs() < 100);
        assert_eq!(pair.slave().engine().stats().steps, 1);
    }

    #[test]
    fn test_reject_policy_keeps_slewing() {
        let mut pair = SimPair::new(PairConfig {
            master_lead_ticks: 10_000_000,
            slave_step_policy: StepPolicy::RejectAfterSlew,
            ..Default::default()
        })
        .unwrap();

        pair.run(5);
        pair.master_probe().counter.advance(300_000_000);
        pair.run(40);

        let stats = pair.slave().engine().stats().clone();
        assert_eq!(stats.steps, 0);
        assert!(stats.rejected >= 1);
        assert!(pair.offset_ns().abs() < 1_000);
    }

    #[test]
    fn test_convergence_over_lossy_segment() {
        let mut pair = SimPair::new(PairConfig {
            chaos: ChaosConfig::lossy(),
            seed: 0x5EED,
            master_lead_ticks: 30_000_000,
            ..Default::default()
        })
        .unwrap();

        pair.run(200);

        assert!(pair.segment().stats().frames_lost > 0);
        assert!(pair.offset_ns().abs() < 1_000);
        let ledger = pair.slave().transport().stack().ledger().clone();
        assert_eq!(ledger.outstanding_rx(), 0);
    }

    #[test]
    fn test_master_ignores_slave_traffic() {
        let mut pair = SimPair::new(PairConfig::default()).unwrap();
        let before = pair.master_time();
        pair.run(10);

        let master = pair.master().engine();
        assert_eq!(master.role(), Role::Master);
        assert_eq!(master.stats().syncs_received, 0);
        assert_eq!(pair.master().clock().slew_offset(), 0);
        assert!(pair.master_time() > before);

        pair.shutdown();
        assert_eq!(pair.master().transport().live_endpoints(), 0);
    }
}
