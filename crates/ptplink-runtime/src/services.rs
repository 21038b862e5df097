//! Platform services handed to the engine on each callback

use ptplink_clock::{HardwareClock, TickSource};
use ptplink_core::{ClockValue, PlatformResult, PtpSender};
use ptplink_transport::{NetworkStack, NetworkTransport};

use crate::PlatformServices;

/// Borrowed view of the clock and transport for the duration of one engine
/// callback
pub struct Services<'a, T: TickSource, S: NetworkStack> {
    clock: &'a mut HardwareClock<T>,
    transport: &'a mut NetworkTransport<S>,
}

impl<'a, T: TickSource, S: NetworkStack> Services<'a, T, S> {
    pub fn new(clock: &'a mut HardwareClock<T>, transport: &'a mut NetworkTransport<S>) -> Self {
        Self { clock, transport }
    }
}

impl<T: TickSource, S: NetworkStack> PtpSender for Services<'_, T, S> {
    fn send_event(&mut self, data: &[u8]) -> PlatformResult<usize> {
        self.transport.send_event(data)
    }

    fn send_general(&mut self, data: &[u8]) -> PlatformResult<usize> {
        self.transport.send_general(data)
    }
}

impl<T: TickSource, S: NetworkStack> PlatformServices for Services<'_, T, S> {
    fn read_clock(&mut self) -> ClockValue {
        self.clock.read()
    }

    fn set_clock(&mut self, value: ClockValue) -> PlatformResult<()> {
        self.clock.set(value)
    }

    fn adjust_clock(&mut self, delta_ns: i64) {
        self.clock.adjust(delta_ns)
    }
}
