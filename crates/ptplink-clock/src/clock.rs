//! Hardware clock presented to the PTP engine

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use ptplink_core::{ClockValue, PlatformError, PlatformResult, NANOS_PER_SEC};

use crate::TickSource;

/// What `set()` does once the servo has started slewing the clock.
///
/// A hard set discards the accumulated slew and can step time backwards,
/// so after the first `adjust()` it is suspect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Always step, silently
    Allow,
    /// Step, but log a warning if the clock has been slewed since the last set
    #[default]
    WarnAfterSlew,
    /// Refuse to step once the clock has been slewed
    RejectAfterSlew,
}

/// Hardware clock configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Counter input frequency used for tick <-> nanosecond conversion
    pub frequency_hz: u64,
    /// Behaviour of `set()` after slewing
    pub step_policy: StepPolicy,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            frequency_hz: 100_000_000,
            step_policy: StepPolicy::WarnAfterSlew,
        }
    }
}

impl ClockConfig {
    /// Configuration for a counter clocked at `frequency_hz`
    pub fn with_frequency(frequency_hz: u64) -> Self {
        ClockConfig {
            frequency_hz,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if self.frequency_hz == 0 {
            return Err(PlatformError::InvalidConfig(
                "clock frequency must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Monotonic, adjustable clock over a 64-bit tick source.
///
/// Time = ticks converted at `frequency_hz`, plus a signed slew offset.
/// Only `set()` touches the counter; `adjust()` only moves the offset.
pub struct HardwareClock<T: TickSource> {
    source: T,
    config: ClockConfig,
    /// Software slew applied on every read
    slew_offset_ns: i64,
    /// `adjust()` has been called since the last `set()`
    slewed: bool,
}

impl<T: TickSource> HardwareClock<T> {
    /// Configure the counter, zero it and start it running.
    ///
    /// Failure here is fatal: there is no timestamping without the counter.
    pub fn init(mut source: T, config: ClockConfig) -> PlatformResult<Self> {
        config.validate()?;

        tracing::info!(frequency_hz = config.frequency_hz, "initializing hardware clock");
        source.init().map_err(|e| {
            tracing::error!(error = %e, "failed to initialize hardware timer");
            PlatformError::ClockInit(e.to_string())
        })?;
        tracing::info!("64-bit hardware counter started");

        Ok(HardwareClock {
            source,
            config,
            slew_offset_ns: 0,
            slewed: false,
        })
    }

    /// Current time: converted tick count plus the slew offset
    pub fn read(&mut self) -> ClockValue {
        let ticks = self.source.ticks();
        ClockValue::from_nanos(self.ticks_to_nanos(ticks)).offset_by(self.slew_offset_ns as i128)
    }

    /// Hard-set the clock. Reloads the counter and zeroes the slew offset.
    ///
    /// This is a discontinuous jump meant for initialization only; see
    /// [`StepPolicy`] for what happens once the servo is slewing.
    pub fn set(&mut self, value: ClockValue) -> PlatformResult<()> {
        if self.slewed {
            match self.config.step_policy {
                StepPolicy::Allow => {}
                StepPolicy::WarnAfterSlew => {
                    tracing::warn!(
                        slew_offset_ns = self.slew_offset_ns,
                        requested = %value,
                        "stepping a slewed clock, accumulated slew is discarded"
                    );
                }
                StepPolicy::RejectAfterSlew => {
                    tracing::warn!(requested = %value, "rejected clock step after slew");
                    return Err(PlatformError::StepRejected);
                }
            }
        }

        let ticks = self.nanos_to_ticks(value.as_nanos());
        self.source.load(ticks);
        self.slew_offset_ns = 0;
        self.slewed = false;
        tracing::debug!(requested = %value, ticks, "clock set");
        Ok(())
    }

    /// Slew the clock by `delta_ns`. Visible on the next `read()`.
    pub fn adjust(&mut self, delta_ns: i64) {
        self.slew_offset_ns = self.slew_offset_ns.saturating_add(delta_ns);
        self.slewed = true;
    }

    /// Accumulated slew offset in nanoseconds
    pub fn slew_offset(&self) -> i64 {
        self.slew_offset_ns
    }

    pub fn frequency_hz(&self) -> u64 {
        self.config.frequency_hz
    }

    /// Duration of one counter tick, rounded up to whole nanoseconds
    pub fn tick_period_ns(&self) -> u64 {
        NANOS_PER_SEC.div_ceil(self.config.frequency_hz)
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn source(&self) -> &T {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut T {
        &mut self.source
    }

    fn ticks_to_nanos(&self, ticks: u64) -> u128 {
        ticks as u128 * NANOS_PER_SEC as u128 / self.config.frequency_hz as u128
    }

    fn nanos_to_ticks(&self, nanos: u128) -> u64 {
        let ticks = nanos * self.config.frequency_hz as u128 / NANOS_PER_SEC as u128;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

/// Clock handle that serializes every read, set and adjust.
///
/// For hosts where the receive path and the tick dispatch run on different
/// threads: the slew offset and the split-register read are never touched by
/// two contexts at once.
pub struct SharedClock<T: TickSource> {
    inner: Arc<Mutex<HardwareClock<T>>>,
}

impl<T: TickSource> SharedClock<T> {
    pub fn new(clock: HardwareClock<T>) -> Self {
        SharedClock {
            inner: Arc::new(Mutex::new(clock)),
        }
    }

    pub fn read(&self) -> ClockValue {
        self.inner.lock().read()
    }

    pub fn set(&self, value: ClockValue) -> PlatformResult<()> {
        self.inner.lock().set(value)
    }

    pub fn adjust(&self, delta_ns: i64) {
        self.inner.lock().adjust(delta_ns)
    }

    pub fn slew_offset(&self) -> i64 {
        self.inner.lock().slew_offset()
    }

    /// Run `f` with exclusive access to the clock
    pub fn with<R>(&self, f: impl FnOnce(&mut HardwareClock<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<T: TickSource> Clone for SharedClock<T> {
    fn clone(&self) -> Self {
        SharedClock {
            inner: Arc::clone(&self.inner),
        }
    }
}
