//! PTP Node - Bootstrap and dispatch loop

use tracing::{error, info, warn};

use ptplink_clock::{HardwareClock, TickSource};
use ptplink_core::PlatformResult;
use ptplink_transport::{NetworkStack, NetworkTransport};

use crate::{
    ForeignRecordTable, InterruptController, PeriodicTimer, PlatformConfig, ProtocolEngine,
    Services, TimerScheduler,
};

/// The peripherals a node runs on
pub trait Board {
    type Counter: TickSource;
    type Stack: NetworkStack;
    type Interrupts: InterruptController;
    type Timer: PeriodicTimer;

    /// Hand the peripherals over to the node
    fn split(self) -> (Self::Counter, Self::Stack, Self::Interrupts, Self::Timer);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub iterations: u64,
    pub datagrams_in: u64,
    pub periodic_runs: u64,
    /// False if the engine reported a startup failure
    pub engine_started: bool,
}

/// What one loop iteration did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Iteration {
    pub datagrams: usize,
    pub ticked: bool,
}

/// A running PTP node: clock, transport, periodic tick and engine
pub struct Node<B: Board, E: ProtocolEngine> {
    clock: HardwareClock<B::Counter>,
    transport: NetworkTransport<B::Stack>,
    scheduler: TimerScheduler<B::Interrupts, B::Timer>,
    engine: E,
    config: PlatformConfig,
    stats: RuntimeStats,
}

impl<B: Board, E: ProtocolEngine> Node<B, E> {
    /// Bring the platform up.
    ///
    /// Clock, periodic timer and transport endpoint failures abort startup.
    /// An engine startup failure is logged and the node runs anyway, so the
    /// engine can retry from its periodic handler.
    pub fn start(board: B, engine: E, config: PlatformConfig) -> PlatformResult<Self> {
        config.validate()?;
        info!("----- PTP node starting -----");

        let (counter, stack, interrupts, timer) = board.split();

        let clock = HardwareClock::init(counter, config.clock.clone())?;
        let scheduler = TimerScheduler::init(interrupts, timer, config.scheduler.clone())?;

        config.interface.log_settings();

        let mut transport = NetworkTransport::new(stack, config.transport.clone());
        transport.init()?;

        let mut node = Node {
            clock,
            transport,
            scheduler,
            engine,
            config,
            stats: RuntimeStats::default(),
        };
        node.start_engine();

        info!("PTP initialized, entering main loop");
        Ok(node)
    }

    fn start_engine(&mut self) {
        let foreign = ForeignRecordTable::with_capacity(self.config.engine.max_foreign_records);
        let mut services = Services::new(&mut self.clock, &mut self.transport);
        match self
            .engine
            .startup(&mut services, &self.config.engine, foreign)
        {
            Ok(()) => {
                self.stats.engine_started = true;
            }
            Err(e) => {
                error!(error = %e, "PTP engine startup failed");
            }
        }
    }

    /// One pass of the dispatch loop: stack timers, network input, then the
    /// periodic handler if a tick arrived. Never blocks.
    pub fn run_once(&mut self) -> Iteration {
        self.stats.iterations += 1;

        self.transport.service_timers();

        let Node {
            clock,
            transport,
            engine,
            ..
        } = self;
        let datagrams = transport.poll(
            &mut |payload: &[u8], tx: &mut NetworkTransport<B::Stack>| {
                let mut services = Services::new(&mut *clock, tx);
                engine.handle_message(payload, &mut services);
            },
        );
        self.stats.datagrams_in += datagrams as u64;

        let ticked = self.scheduler.take_tick();
        if ticked {
            let mut services = Services::new(&mut self.clock, &mut self.transport);
            self.engine.periodic_handler(&mut services);
            self.stats.periodic_runs += 1;
        }

        Iteration { datagrams, ticked }
    }

    /// Run `iterations` passes
    pub fn run_for(&mut self, iterations: usize) -> RuntimeStats {
        for _ in 0..iterations {
            self.run_once();
        }
        self.stats.clone()
    }

    /// Run until `done` returns true, checked after every pass
    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) {
        while !done(&*self) {
            self.run_once();
        }
    }

    /// Busy-poll forever
    pub fn run(&mut self) -> ! {
        loop {
            self.run_once();
        }
    }

    /// Close the transport. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if !self.transport.is_open() {
            warn!("shutdown on a node whose transport is already closed");
        }
        self.transport.shutdown();
        info!(
            iterations = self.stats.iterations,
            periodic_runs = self.stats.periodic_runs,
            "node stopped"
        );
    }

    pub fn clock(&self) -> &HardwareClock<B::Counter> {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut HardwareClock<B::Counter> {
        &mut self.clock
    }

    pub fn transport(&self) -> &NetworkTransport<B::Stack> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut NetworkTransport<B::Stack> {
        &mut self.transport
    }

    pub fn scheduler(&self) -> &TimerScheduler<B::Interrupts, B::Timer> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut TimerScheduler<B::Interrupts, B::Timer> {
        &mut self.scheduler
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    /// Run `f` with the same services the engine sees
    pub fn with_services<R>(
        &mut self,
        f: impl FnOnce(&mut Services<'_, B::Counter, B::Stack>) -> R,
    ) -> R {
        let mut services = Services::new(&mut self.clock, &mut self.transport);
        f(&mut services)
    }
}
