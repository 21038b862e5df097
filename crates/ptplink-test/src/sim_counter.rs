//! Simulated cascaded 32-bit counter pair

use std::sync::Arc;

use parking_lot::Mutex;

use ptplink_clock::{CounterError, SplitCounter};

#[derive(Debug, Default)]
struct Registers {
    value: u64,
    reset: u64,
    running: bool,
    cascaded: bool,
    /// Ticks that elapse between consecutive register reads
    step_per_read: u64,
    reads: u64,
}

impl Registers {
    fn elapse(&mut self, ticks: u64) {
        if self.running {
            self.value = if self.cascaded {
                self.value.wrapping_add(ticks)
            } else {
                // Without cascade the high half never sees the carry
                let low = (self.value as u32).wrapping_add(ticks as u32);
                (self.value & 0xFFFF_FFFF_0000_0000) | low as u64
            };
        }
    }

    fn after_read(&mut self) {
        self.reads += 1;
        let step = self.step_per_read;
        self.elapse(step);
    }
}

/// Driver-side handle to a simulated counter. The clock owns the counter;
/// the test keeps the probe to move time forward.
#[derive(Clone, Debug)]
pub struct CounterProbe {
    regs: Arc<Mutex<Registers>>,
}

impl CounterProbe {
    /// Let `ticks` counter periods elapse
    pub fn advance(&self, ticks: u64) {
        self.regs.lock().elapse(ticks);
    }

    /// Raw 64-bit register value
    pub fn value(&self) -> u64 {
        self.regs.lock().value
    }

    /// Force the raw value, e.g. just below a 32-bit rollover
    pub fn place(&self, value: u64) {
        self.regs.lock().value = value;
    }

    /// Ticks elapsing between register reads; non-zero makes reads race
    /// the counter the way real hardware does
    pub fn set_step_per_read(&self, step: u64) {
        self.regs.lock().step_per_read = step;
    }

    pub fn is_running(&self) -> bool {
        self.regs.lock().running
    }

    /// Register reads performed so far
    pub fn reads(&self) -> u64 {
        self.regs.lock().reads
    }
}

/// Simulated pair of 32-bit counters, cascadable into 64 bits
#[derive(Debug)]
pub struct SimulatedSplitCounter {
    regs: Arc<Mutex<Registers>>,
    cascade_supported: bool,
}

impl SimulatedSplitCounter {
    pub fn new() -> Self {
        SimulatedSplitCounter {
            regs: Arc::new(Mutex::new(Registers {
                running: true,
                ..Default::default()
            })),
            cascade_supported: true,
        }
    }

    /// A counter whose driver refuses cascade mode, failing clock init
    pub fn without_cascade() -> Self {
        SimulatedSplitCounter {
            cascade_supported: false,
            ..Self::new()
        }
    }

    pub fn probe(&self) -> CounterProbe {
        CounterProbe {
            regs: Arc::clone(&self.regs),
        }
    }
}

impl Default for SimulatedSplitCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitCounter for SimulatedSplitCounter {
    fn configure_cascade(&mut self) -> Result<(), CounterError> {
        if !self.cascade_supported {
            return Err(CounterError::CascadeUnsupported(0));
        }
        self.regs.lock().cascaded = true;
        Ok(())
    }

    fn read_high(&mut self) -> u32 {
        let mut regs = self.regs.lock();
        let high = (regs.value >> 32) as u32;
        regs.after_read();
        high
    }

    fn read_low(&mut self) -> u32 {
        let mut regs = self.regs.lock();
        let low = regs.value as u32;
        regs.after_read();
        low
    }

    fn stop(&mut self) {
        self.regs.lock().running = false;
    }

    fn set_reset_value(&mut self, high: u32, low: u32) {
        self.regs.lock().reset = ((high as u64) << 32) | low as u64;
    }

    fn reset(&mut self) {
        let mut regs = self.regs.lock();
        regs.value = regs.reset;
    }

    fn start(&mut self) {
        self.regs.lock().running = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptplink_clock::{Cascaded, TickSource};
    use proptest::prelude::*;

    #[test]
    fn test_init_zeroes_and_runs() {
        let sim = SimulatedSplitCounter::new();
        let probe = sim.probe();
        probe.place(12345);

        let mut counter = Cascaded::new(sim);
        counter.init().unwrap();
        assert_eq!(probe.value(), 0);
        assert!(probe.is_running());

        probe.advance(1_000);
        assert_eq!(counter.ticks(), 1_000);
    }

    #[test]
    fn test_carry_needs_cascade() {
        let sim = SimulatedSplitCounter::new();
        let probe = sim.probe();
        probe.place(0xFFFF_FFFF);
        probe.advance(1);
        assert_eq!(probe.value(), 0);

        let mut counter = Cascaded::new(sim);
        counter.init().unwrap();
        probe.place(0xFFFF_FFFF);
        probe.advance(1);
        assert_eq!(probe.value(), 0x1_0000_0000);
    }

    #[test]
    fn test_refused_cascade_fails_init() {
        let mut counter = Cascaded::new(SimulatedSplitCounter::without_cascade());
        assert_eq!(counter.init(), Err(CounterError::CascadeUnsupported(0)));
    }

    #[test]
    fn test_read_racing_rollover_is_not_torn() {
        let sim = SimulatedSplitCounter::new();
        let probe = sim.probe();
        let mut counter = Cascaded::new(sim);
        counter.init().unwrap();

        probe.place(0x0000_0000_FFFF_FFFE);
        probe.set_step_per_read(1);

        let ticks = counter.ticks();
        assert!(ticks >= 0x1_0000_0000, "torn read: {ticks:#x}");
        assert_eq!(counter.retries(), 1);
    }

    #[test]
    fn test_load_restarts_from_value() {
        let sim = SimulatedSplitCounter::new();
        let probe = sim.probe();
        let mut counter = Cascaded::new(sim);
        counter.init().unwrap();

        counter.load(0x0000_0007_0000_0010);
        assert_eq!(probe.value(), 0x0000_0007_0000_0010);
        assert!(probe.is_running());
    }

    proptest! {
        #[test]
        fn prop_reads_racing_rollover_never_tear(
            high in 0u32..1_000,
            below in 0u64..16,
            step in 1u64..8,
        ) {
            let sim = SimulatedSplitCounter::new();
            let probe = sim.probe();
            let mut counter = Cascaded::new(sim);
            counter.init().unwrap();

            let start = ((high as u64) << 32) | (0xFFFF_FFFF - below);
            probe.place(start);
            probe.set_step_per_read(step);

            let first = counter.ticks();
            let second = counter.ticks();
            prop_assert!(first >= start);
            prop_assert!(first <= start + 6 * step);
            prop_assert!(second > first);
        }
    }
}
