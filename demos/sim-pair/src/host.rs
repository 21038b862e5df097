//! ptplink Host Node Demo
//!
//! Runs one node on the host: monotonic clock, UDP via tokio, and a
//! sleeping thread standing in for the timer interrupt. The node acts as a
//! master and multicasts Sync/Announce on the configured ports.
//!
//! Without `--well-known-ports` the node binds ephemeral local ports, so it
//! can send to 319/320 but not hear other nodes.
//!
//! Usage: host-node [--config FILE] [--seconds N] [--well-known-ports]

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ptplink_clock::{CounterError, TickSource};
use ptplink_runtime::{
    init_logging, Board, InterruptController, InterruptId, IrqError, Node, PeriodicTimer,
    PlatformConfig, TickFlag,
};
use ptplink_test::SyncEngine;
use ptplink_transport::{TokioStack, TransportConfig};

/// Tick source over `Instant`, scaled to the configured frequency
struct MonotonicCounter {
    frequency_hz: u64,
    epoch: Instant,
    base: u64,
}

impl MonotonicCounter {
    fn new(frequency_hz: u64) -> Self {
        MonotonicCounter {
            frequency_hz,
            epoch: Instant::now(),
            base: 0,
        }
    }
}

impl TickSource for MonotonicCounter {
    fn init(&mut self) -> Result<(), CounterError> {
        if self.frequency_hz == 0 {
            return Err(CounterError::Driver("zero counter frequency".into()));
        }
        self.epoch = Instant::now();
        self.base = 0;
        Ok(())
    }

    fn ticks(&mut self) -> u64 {
        let elapsed = self.epoch.elapsed().as_nanos();
        let ticks = elapsed * u128::from(self.frequency_hz) / 1_000_000_000;
        self.base.wrapping_add(ticks as u64)
    }

    fn load(&mut self, ticks: u64) {
        self.epoch = Instant::now();
        self.base = ticks;
    }
}

type SharedHandler = Arc<Mutex<Option<Arc<TickFlag>>>>;

/// Routes the ticker thread to the connected flag
struct ThreadInterrupts {
    handler: SharedHandler,
    enabled: Arc<AtomicBool>,
}

impl InterruptController for ThreadInterrupts {
    fn initialize(&mut self) -> Result<(), IrqError> {
        Ok(())
    }

    fn connect(&mut self, _irq: InterruptId, flag: Arc<TickFlag>) -> Result<(), IrqError> {
        *self.handler.lock() = Some(flag);
        Ok(())
    }

    fn start(&mut self) -> Result<(), IrqError> {
        Ok(())
    }

    fn enable(&mut self, _irq: InterruptId) {
        self.enabled.store(true, Ordering::Release);
    }
}

/// Periodic timer backed by a sleeping thread
struct ThreadTimer {
    timer_clock_hz: u64,
    reload: u32,
    handler: SharedHandler,
    enabled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicTimer for ThreadTimer {
    fn initialize(&mut self) -> Result<(), IrqError> {
        if self.timer_clock_hz == 0 {
            return Err(IrqError::Driver("zero timer clock".into()));
        }
        Ok(())
    }

    fn configure_periodic(&mut self, reload: u32) {
        self.reload = reload;
    }

    fn start(&mut self) {
        let period = Duration::from_nanos(
            u64::from(self.reload) * 1_000_000_000 / self.timer_clock_hz,
        );
        let handler = Arc::clone(&self.handler);
        let enabled = Arc::clone(&self.enabled);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        self.thread = Some(thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                thread::sleep(period);
                if enabled.load(Ordering::Acquire) {
                    if let Some(flag) = handler.lock().as_ref() {
                        flag.raise();
                    }
                }
            }
        }));
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct HostBoard {
    counter: MonotonicCounter,
    stack: TokioStack,
    interrupts: ThreadInterrupts,
    timer: ThreadTimer,
}

impl HostBoard {
    fn new(config: &PlatformConfig) -> std::io::Result<Self> {
        let handler = SharedHandler::default();
        let enabled = Arc::new(AtomicBool::new(false));
        Ok(HostBoard {
            counter: MonotonicCounter::new(config.clock.frequency_hz),
            stack: TokioStack::new(config.transport.bind_addr)?,
            interrupts: ThreadInterrupts {
                handler: Arc::clone(&handler),
                enabled: Arc::clone(&enabled),
            },
            timer: ThreadTimer {
                timer_clock_hz: config.scheduler.timer_clock_hz,
                reload: 0,
                handler,
                enabled,
                running: Arc::new(AtomicBool::new(false)),
                thread: None,
            },
        })
    }
}

impl Board for HostBoard {
    type Counter = MonotonicCounter;
    type Stack = TokioStack;
    type Interrupts = ThreadInterrupts;
    type Timer = ThreadTimer;

    fn split(self) -> (Self::Counter, Self::Stack, Self::Interrupts, Self::Timer) {
        (self.counter, self.stack, self.interrupts, self.timer)
    }
}

fn main() -> ExitCode {
    let mut config_path = None;
    let mut seconds = 5u64;
    let mut well_known = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => config_path = it.next(),
            "--seconds" => seconds = it.next().and_then(|v| v.parse().ok()).unwrap_or(seconds),
            "--well-known-ports" => well_known = true,
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: host-node [--config FILE] [--seconds N] [--well-known-ports]");
                return ExitCode::from(2);
            }
        }
    }

    let mut config = match config_path {
        Some(path) => match PlatformConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => PlatformConfig::default(),
    };
    if !well_known {
        // Binding 319/320 needs privileges on most hosts; sends still go
        // to the configured destination ports
        config.transport = TransportConfig {
            event_port: 0,
            general_port: 0,
            ..config.transport
        };
    }
    init_logging(config.log_format);

    let board = match HostBoard::new(&config) {
        Ok(board) => board,
        Err(e) => {
            tracing::error!(error = %e, "failed to create host network stack");
            return ExitCode::FAILURE;
        }
    };

    let identity = {
        let [a, b, c, d] = config.interface.address.octets();
        let mac = config.interface.mac;
        [mac[0], mac[1], mac[2], 0xff, 0xfe, mac[3] ^ a ^ b, mac[4] ^ c, mac[5] ^ d, 0, 1]
    };

    let mut node = match Node::start(board, SyncEngine::new(identity), config) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "node failed to start");
            return ExitCode::FAILURE;
        }
    };

    let deadline = Instant::now() + Duration::from_secs(seconds);
    node.run_until(|_| Instant::now() >= deadline);

    let stats = node.stats().clone();
    let sent = node.engine().stats().clone();
    node.shutdown();

    println!(
        "{} loop passes, {} periodic runs, {} syncs and {} announces sent",
        stats.iterations, stats.periodic_runs, sent.syncs_sent, sent.announces_sent
    );
    ExitCode::SUCCESS
}
