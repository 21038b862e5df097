//! Simulated interrupt controller and periodic timer

use std::sync::Arc;

use parking_lot::Mutex;

use ptplink_runtime::{InterruptController, InterruptId, IrqError, PeriodicTimer, TickFlag};

/// Controller bring-up failures to inject
#[derive(Clone, Debug, Default)]
pub struct IrqFaults {
    pub fail_initialize: bool,
    pub fail_connect: bool,
    pub fail_start: bool,
}

#[derive(Debug, Default)]
struct LineState {
    handler: Option<(InterruptId, Arc<TickFlag>)>,
    started: bool,
    enabled: bool,
    fired: u64,
    delivered: u64,
}

/// The timer's interrupt line, as seen from outside the node
#[derive(Clone, Debug, Default)]
pub struct IrqLine {
    state: Arc<Mutex<LineState>>,
}

impl IrqLine {
    /// Assert the line once. Returns true if the handler ran.
    pub fn fire(&self) -> bool {
        let mut state = self.state.lock();
        state.fired += 1;
        if !(state.started && state.enabled) {
            return false;
        }
        let Some(flag) = state.handler.as_ref().map(|(_, flag)| Arc::clone(flag)) else {
            return false;
        };
        flag.raise();
        state.delivered += 1;
        true
    }

    /// Times the line was asserted
    pub fn fired(&self) -> u64 {
        self.state.lock().fired
    }

    /// Times the handler actually ran
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    pub fn connected_irq(&self) -> Option<InterruptId> {
        self.state.lock().handler.as_ref().map(|(irq, _)| *irq)
    }
}

/// Interrupt controller with one simulated line
#[derive(Debug, Default)]
pub struct SimInterruptController {
    line: IrqLine,
    pub faults: IrqFaults,
}

impl SimInterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: IrqFaults) -> Self {
        SimInterruptController {
            faults,
            ..Self::default()
        }
    }

    pub fn line(&self) -> IrqLine {
        self.line.clone()
    }
}

impl InterruptController for SimInterruptController {
    fn initialize(&mut self) -> Result<(), IrqError> {
        if self.faults.fail_initialize {
            return Err(IrqError::DeviceNotFound);
        }
        Ok(())
    }

    fn connect(&mut self, irq: InterruptId, flag: Arc<TickFlag>) -> Result<(), IrqError> {
        if self.faults.fail_connect {
            return Err(IrqError::VectorUnavailable(irq));
        }
        self.line.state.lock().handler = Some((irq, flag));
        Ok(())
    }

    fn start(&mut self) -> Result<(), IrqError> {
        if self.faults.fail_start {
            return Err(IrqError::Driver("controller refused real mode".into()));
        }
        self.line.state.lock().started = true;
        Ok(())
    }

    fn enable(&mut self, _irq: InterruptId) {
        self.line.state.lock().enabled = true;
    }
}

/// Periodic timer that records how it was programmed
#[derive(Debug, Default)]
pub struct SimTimer {
    pub fail_initialize: bool,
    reload: Option<u32>,
    running: bool,
}

impl SimTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        SimTimer {
            fail_initialize: true,
            ..Self::default()
        }
    }

    pub fn reload(&self) -> Option<u32> {
        self.reload
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl PeriodicTimer for SimTimer {
    fn initialize(&mut self) -> Result<(), IrqError> {
        if self.fail_initialize {
            return Err(IrqError::DeviceNotFound);
        }
        Ok(())
    }

    fn configure_periodic(&mut self, reload: u32) {
        self.reload = Some(reload);
    }

    fn start(&mut self) {
        self.running = true;
    }
}
