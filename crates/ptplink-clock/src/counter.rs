//! Tick sources backing the hardware clock

use thiserror::Error;

/// Counter driver errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("counter driver initialization failed: {0}")]
    Driver(String),

    #[error("cascade mode not supported by counter {0}")]
    CascadeUnsupported(u8),
}

/// A free-running 64-bit tick counter.
///
/// Implementations backed by a native 64-bit register implement this
/// directly; two cascaded 32-bit registers go through [`Cascaded`].
pub trait TickSource {
    /// Configure, zero and start the counter. Called exactly once.
    fn init(&mut self) -> Result<(), CounterError>;

    /// Current tick count. Must never return a torn value.
    fn ticks(&mut self) -> u64;

    /// Stop the counter, load `ticks` as its value and restart it
    fn load(&mut self, ticks: u64);
}

/// Two 32-bit counters wired so the low counter's overflow clocks the high one
pub trait SplitCounter {
    /// Put both counters in cascade mode (low supplies carry to high)
    fn configure_cascade(&mut self) -> Result<(), CounterError>;

    /// Read the high 32 bits
    fn read_high(&mut self) -> u32;

    /// Read the low 32 bits
    fn read_low(&mut self) -> u32;

    /// Stop both counters
    fn stop(&mut self);

    /// Program the reset/reload registers of both counters
    fn set_reset_value(&mut self, high: u32, low: u32);

    /// Load both counters from their reset registers
    fn reset(&mut self);

    /// Start both counters
    fn start(&mut self);
}

/// Read a split counter without tearing across the 32/32 boundary.
///
/// Reads high, low, high again and retries while the two high reads differ.
/// Returns the assembled value and how many retries were needed.
pub fn read_split<T: SplitCounter + ?Sized>(counter: &mut T) -> (u64, u32) {
    let mut retries = 0;
    loop {
        let high1 = counter.read_high();
        let low = counter.read_low();
        let high2 = counter.read_high();
        if high1 == high2 {
            return (((high2 as u64) << 32) | low as u64, retries);
        }
        retries += 1;
    }
}

/// Adapter presenting a [`SplitCounter`] as one 64-bit [`TickSource`]
#[derive(Debug)]
pub struct Cascaded<T> {
    inner: T,
    /// Total rollover retries observed by `ticks()`
    retries: u64,
}

impl<T: SplitCounter> Cascaded<T> {
    pub fn new(inner: T) -> Self {
        Cascaded { inner, retries: 0 }
    }

    /// Rollovers caught mid-read since construction
    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: SplitCounter> TickSource for Cascaded<T> {
    fn init(&mut self) -> Result<(), CounterError> {
        self.inner.stop();
        self.inner.configure_cascade()?;
        self.inner.set_reset_value(0, 0);
        self.inner.reset();
        self.inner.start();
        Ok(())
    }

    fn ticks(&mut self) -> u64 {
        let (ticks, retries) = read_split(&mut self.inner);
        if retries > 0 {
            tracing::trace!(retries, "counter rollover during read");
            self.retries += retries as u64;
        }
        ticks
    }

    fn load(&mut self, ticks: u64) {
        self.inner.stop();
        self.inner
            .set_reset_value((ticks >> 32) as u32, ticks as u32);
        self.inner.reset();
        self.inner.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter that advances by `step` ticks after every register read
    struct SteppingCounter {
        value: u64,
        step: u64,
        reset_value: u64,
        running: bool,
        cascaded: bool,
    }

    impl SteppingCounter {
        fn at(value: u64, step: u64) -> Self {
            SteppingCounter {
                value,
                step,
                reset_value: 0,
                running: true,
                cascaded: false,
            }
        }

        fn advance(&mut self) {
            if self.running {
                self.value = self.value.wrapping_add(self.step);
            }
        }
    }

    impl SplitCounter for SteppingCounter {
        fn configure_cascade(&mut self) -> Result<(), CounterError> {
            self.cascaded = true;
            Ok(())
        }

        fn read_high(&mut self) -> u32 {
            let high = (self.value >> 32) as u32;
            self.advance();
            high
        }

        fn read_low(&mut self) -> u32 {
            let low = self.value as u32;
            self.advance();
            low
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn set_reset_value(&mut self, high: u32, low: u32) {
            self.reset_value = ((high as u64) << 32) | low as u64;
        }

        fn reset(&mut self) {
            self.value = self.reset_value;
        }

        fn start(&mut self) {
            self.running = true;
        }
    }

    #[test]
    fn test_read_without_rollover() {
        let mut counter = SteppingCounter::at(0x0000_0005_0000_0100, 1);
        let (ticks, retries) = read_split(&mut counter);
        assert_eq!(retries, 0);
        assert_eq!(ticks >> 32, 5);
        assert_eq!(ticks as u32, 0x101);
    }

    #[test]
    fn test_low_wrap_between_reads_retries() {
        // high1 = 0, low = 0xFFFF_FFFF, then the low register wraps and
        // high2 = 1: a naive read would return 0x0000_0000_FFFF_FFFF or
        // 0x0000_0000_0000_0000 depending on order.
        let mut counter = SteppingCounter::at(0x0000_0000_FFFF_FFFE, 1);
        let (ticks, retries) = read_split(&mut counter);
        assert_eq!(retries, 1);
        assert_eq!(ticks >> 32, 1);
        assert!(ticks >= 0x1_0000_0000);
    }

    #[test]
    fn test_cascaded_init_zeroes_and_starts() {
        let mut source = Cascaded::new(SteppingCounter::at(0xDEAD_BEEF, 0));
        source.init().unwrap();
        assert!(source.inner().cascaded);
        assert!(source.inner().running);
        assert_eq!(source.ticks(), 0);
    }

    #[test]
    fn test_cascaded_load_splits_value() {
        let mut source = Cascaded::new(SteppingCounter::at(0, 0));
        source.init().unwrap();
        source.load(0x0000_0012_3456_7890);
        assert_eq!(source.inner().reset_value, 0x0000_0012_3456_7890);
        assert_eq!(source.ticks(), 0x0000_0012_3456_7890);
        assert!(source.inner().running);
    }

    #[test]
    fn test_cascaded_counts_retries() {
        let mut source = Cascaded::new(SteppingCounter::at(0, 0));
        source.init().unwrap();
        source.inner_mut().value = 0xFFFF_FFFE;
        source.inner_mut().step = 1;
        let first = source.ticks();
        let second = source.ticks();
        assert!(second >= first);
        assert_eq!(source.retries(), 1);
    }
}
