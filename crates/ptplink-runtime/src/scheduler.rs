//! Periodic tick scheduling
//!
//! A hardware timer in auto-reload mode raises an interrupt at a fixed rate.
//! The interrupt controller routes it to a [`TickFlag`]; the dispatch loop
//! consumes the flag and runs the periodic handler on the main context.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use ptplink_core::{PlatformError, PlatformResult};

use crate::TickFlag;

/// Interrupt vector number
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterruptId(pub u32);

impl fmt::Display for InterruptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

/// Interrupt controller or timer driver failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrqError {
    #[error("device not found")]
    DeviceNotFound,

    #[error("vector {0} unavailable")]
    VectorUnavailable(InterruptId),

    #[error("driver error: {0}")]
    Driver(String),
}

/// Interrupt controller driver
pub trait InterruptController {
    fn initialize(&mut self) -> Result<(), IrqError>;

    /// Route `irq` to `flag`. The handler raises the flag and does nothing else.
    fn connect(&mut self, irq: InterruptId, flag: Arc<TickFlag>) -> Result<(), IrqError>;

    /// Start the controller and enable interrupt delivery to the CPU
    fn start(&mut self) -> Result<(), IrqError>;

    /// Unmask one vector
    fn enable(&mut self, irq: InterruptId);
}

/// Timer peripheral driving the periodic interrupt
pub trait PeriodicTimer {
    fn initialize(&mut self) -> Result<(), IrqError>;

    /// Interrupt on expiry and reload from `reload` automatically
    fn configure_periodic(&mut self, reload: u32);

    fn start(&mut self);
}

/// Periodic tick configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Vector the timer interrupt arrives on
    pub irq: InterruptId,
    /// Periodic handler rate
    pub rate_hz: u32,
    /// Input clock of the timer peripheral
    pub timer_clock_hz: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            irq: InterruptId(0),
            rate_hz: 10,
            timer_clock_hz: 100_000_000,
        }
    }
}

impl SchedulerConfig {
    /// Timer reload value for one tick period
    pub fn reload_value(&self) -> PlatformResult<u32> {
        if self.rate_hz == 0 {
            return Err(PlatformError::InvalidConfig(
                "tick rate must be non-zero".into(),
            ));
        }
        let reload = self.timer_clock_hz / u64::from(self.rate_hz);
        if reload == 0 {
            return Err(PlatformError::InvalidConfig(format!(
                "tick rate {} Hz exceeds timer clock {} Hz",
                self.rate_hz, self.timer_clock_hz
            )));
        }
        u32::try_from(reload).map_err(|_| {
            PlatformError::InvalidConfig(format!(
                "reload value {} does not fit the 32-bit timer",
                reload
            ))
        })
    }

    pub fn validate(&self) -> PlatformResult<()> {
        self.reload_value().map(|_| ())
    }
}

/// Observable state of the tick handoff
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickState {
    /// Timer running, no tick waiting
    Armed,
    /// At least one tick arrived that the loop has not consumed
    Pending,
}

/// Owns the interrupt controller, the timer and the tick flag they share
pub struct TimerScheduler<I, P> {
    controller: I,
    timer: P,
    flag: Arc<TickFlag>,
    config: SchedulerConfig,
    reload: u32,
    dispatched: u64,
}

fn controller_error(stage: &'static str) -> impl FnOnce(IrqError) -> PlatformError {
    move |e| {
        error!(stage, error = %e, "interrupt controller setup failed");
        PlatformError::InterruptController {
            stage,
            reason: e.to_string(),
        }
    }
}

fn timer_error(stage: &'static str) -> impl FnOnce(IrqError) -> PlatformError {
    move |e| {
        error!(stage, error = %e, "timer driver setup failed");
        PlatformError::TimerDriver {
            stage,
            reason: e.to_string(),
        }
    }
}

impl<I: InterruptController, P: PeriodicTimer> TimerScheduler<I, P> {
    /// Bring up the interrupt path and start the periodic timer.
    ///
    /// Any driver failure is returned; the node must not proceed without
    /// its periodic tick.
    pub fn init(mut controller: I, mut timer: P, config: SchedulerConfig) -> PlatformResult<Self> {
        let reload = config.reload_value()?;
        let flag = Arc::new(TickFlag::new());

        controller
            .initialize()
            .map_err(controller_error("initialize"))?;
        timer.initialize().map_err(timer_error("initialize"))?;
        controller
            .connect(config.irq, Arc::clone(&flag))
            .map_err(controller_error("connect"))?;
        controller.start().map_err(controller_error("start"))?;
        controller.enable(config.irq);

        timer.configure_periodic(reload);
        timer.start();

        info!(
            irq = %config.irq,
            rate_hz = config.rate_hz,
            reload,
            "periodic timer started"
        );

        Ok(TimerScheduler {
            controller,
            timer,
            flag,
            config,
            reload,
            dispatched: 0,
        })
    }

    /// Consume a pending tick. True means the periodic handler should run
    /// exactly once now.
    pub fn take_tick(&mut self) -> bool {
        if self.flag.take() {
            self.dispatched += 1;
            debug!(dispatched = self.dispatched, "tick");
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> TickState {
        if self.flag.is_pending() {
            TickState::Pending
        } else {
            TickState::Armed
        }
    }

    /// Ticks consumed by the loop so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn flag(&self) -> &Arc<TickFlag> {
        &self.flag
    }

    pub fn reload(&self) -> u32 {
        self.reload
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn controller(&self) -> &I {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut I {
        &mut self.controller
    }

    pub fn timer(&self) -> &P {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut P {
        &mut self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeIntc {
        fail_at: Option<&'static str>,
        calls: Vec<&'static str>,
        handler: Option<Arc<TickFlag>>,
        enabled: Vec<InterruptId>,
    }

    impl FakeIntc {
        fn step(&mut self, stage: &'static str) -> Result<(), IrqError> {
            self.calls.push(stage);
            if self.fail_at == Some(stage) {
                Err(IrqError::DeviceNotFound)
            } else {
                Ok(())
            }
        }

        fn fire(&self) {
            if let Some(flag) = &self.handler {
                flag.raise();
            }
        }
    }

    impl InterruptController for FakeIntc {
        fn initialize(&mut self) -> Result<(), IrqError> {
            self.step("initialize")
        }

        fn connect(&mut self, _irq: InterruptId, flag: Arc<TickFlag>) -> Result<(), IrqError> {
            self.step("connect")?;
            self.handler = Some(flag);
            Ok(())
        }

        fn start(&mut self) -> Result<(), IrqError> {
            self.step("start")
        }

        fn enable(&mut self, irq: InterruptId) {
            self.enabled.push(irq);
        }
    }

    #[derive(Default)]
    struct FakeTimer {
        fail_init: bool,
        reload: Option<u32>,
        running: bool,
    }

    impl PeriodicTimer for FakeTimer {
        fn initialize(&mut self) -> Result<(), IrqError> {
            if self.fail_init {
                Err(IrqError::Driver("no timer".into()))
            } else {
                Ok(())
            }
        }

        fn configure_periodic(&mut self, reload: u32) {
            self.reload = Some(reload);
        }

        fn start(&mut self) {
            self.running = true;
        }
    }

    #[test]
    fn test_default_reload_is_ten_hertz() {
        assert_eq!(SchedulerConfig::default().reload_value().unwrap(), 10_000_000);
    }

    #[test]
    fn test_reload_must_fit_timer() {
        let config = SchedulerConfig {
            rate_hz: 1,
            timer_clock_hz: 10_000_000_000,
            ..Default::default()
        };
        assert!(matches!(
            config.reload_value(),
            Err(PlatformError::InvalidConfig(_))
        ));

        let zero = SchedulerConfig {
            rate_hz: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_init_programs_timer() {
        let config = SchedulerConfig {
            irq: InterruptId(3),
            ..Default::default()
        };
        let scheduler =
            TimerScheduler::init(FakeIntc::default(), FakeTimer::default(), config).unwrap();

        assert_eq!(
            scheduler.controller().calls,
            vec!["initialize", "connect", "start"]
        );
        assert_eq!(scheduler.controller().enabled, vec![InterruptId(3)]);
        assert_eq!(scheduler.timer().reload, Some(10_000_000));
        assert!(scheduler.timer().running);
        assert_eq!(scheduler.state(), TickState::Armed);
    }

    #[test]
    fn test_controller_failure_is_fatal() {
        let intc = FakeIntc {
            fail_at: Some("connect"),
            ..Default::default()
        };
        let err = TimerScheduler::init(intc, FakeTimer::default(), SchedulerConfig::default())
            .err()
            .unwrap();

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            PlatformError::InterruptController { stage: "connect", .. }
        ));
    }

    #[test]
    fn test_timer_failure_is_fatal() {
        let timer = FakeTimer {
            fail_init: true,
            ..Default::default()
        };
        let err = TimerScheduler::init(FakeIntc::default(), timer, SchedulerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PlatformError::TimerDriver { .. }));
    }

    #[test]
    fn test_ticks_coalesce_before_observation() {
        let mut scheduler = TimerScheduler::init(
            FakeIntc::default(),
            FakeTimer::default(),
            SchedulerConfig::default(),
        )
        .unwrap();

        scheduler.controller().fire();
        scheduler.controller().fire();
        assert_eq!(scheduler.state(), TickState::Pending);

        assert!(scheduler.take_tick());
        assert!(!scheduler.take_tick());
        assert_eq!(scheduler.dispatched(), 1);
        assert_eq!(scheduler.state(), TickState::Armed);
    }
}
