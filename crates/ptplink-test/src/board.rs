//! Simulated board: counter, stack, interrupt controller and timer

use std::net::Ipv4Addr;

use ptplink_clock::Cascaded;
use ptplink_runtime::Board;

use crate::{
    CounterProbe, IrqFaults, IrqLine, Segment, SimInterruptController, SimTimer,
    SimulatedSplitCounter, SimulatedStack, StackFaults,
};

/// Peripherals of one simulated node
pub struct SimBoard {
    pub counter: SimulatedSplitCounter,
    pub stack: SimulatedStack,
    pub interrupts: SimInterruptController,
    pub timer: SimTimer,
}

/// Handles that stay with the test after the board goes into a node
#[derive(Clone, Debug)]
pub struct BoardProbe {
    pub counter: CounterProbe,
    pub irq: IrqLine,
}

impl SimBoard {
    /// Healthy board attached to `segment` at `address`
    pub fn new(segment: &Segment, address: Ipv4Addr) -> Self {
        SimBoard {
            counter: SimulatedSplitCounter::new(),
            stack: SimulatedStack::attach(segment, address),
            interrupts: SimInterruptController::new(),
            timer: SimTimer::new(),
        }
    }

    pub fn with_stack_faults(mut self, faults: StackFaults) -> Self {
        self.stack.faults = faults;
        self
    }

    pub fn with_irq_faults(mut self, faults: IrqFaults) -> Self {
        self.interrupts.faults = faults;
        self
    }

    /// Replace the counter with one that cannot cascade
    pub fn with_broken_counter(mut self) -> Self {
        self.counter = SimulatedSplitCounter::without_cascade();
        self
    }

    pub fn with_broken_timer(mut self) -> Self {
        self.timer = SimTimer::failing();
        self
    }

    pub fn probe(&self) -> BoardProbe {
        BoardProbe {
            counter: self.counter.probe(),
            irq: self.interrupts.line(),
        }
    }
}

impl Board for SimBoard {
    type Counter = Cascaded<SimulatedSplitCounter>;
    type Stack = SimulatedStack;
    type Interrupts = SimInterruptController;
    type Timer = SimTimer;

    fn split(self) -> (Self::Counter, Self::Stack, Self::Interrupts, Self::Timer) {
        (
            Cascaded::new(self.counter),
            self.stack,
            self.interrupts,
            self.timer,
        )
    }
}
