//! Clock value type for the hardware clock
//!
//! A [`ClockValue`] is the (seconds, nanoseconds) pair the protocol engine
//! timestamps with. The nanosecond field is always in `[0, 1e9)`.

use std::fmt;

/// Nanoseconds per second
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Seconds + nanoseconds since the clock epoch
/// INVARIANT: `nanoseconds < NANOS_PER_SEC`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockValue {
    seconds: u64,
    nanoseconds: u32,
}

impl ClockValue {
    pub const ZERO: ClockValue = ClockValue {
        seconds: 0,
        nanoseconds: 0,
    };

    pub const MAX: ClockValue = ClockValue {
        seconds: u64::MAX,
        nanoseconds: (NANOS_PER_SEC - 1) as u32,
    };

    /// Build a value, carrying excess nanoseconds into seconds
    #[inline]
    pub fn new(seconds: u64, nanoseconds: u32) -> Self {
        let carry = nanoseconds as u64 / NANOS_PER_SEC;
        ClockValue {
            seconds: seconds.saturating_add(carry),
            nanoseconds: (nanoseconds as u64 % NANOS_PER_SEC) as u32,
        }
    }

    /// Build from a total nanosecond count, saturating at [`ClockValue::MAX`]
    #[inline]
    pub fn from_nanos(total: u128) -> Self {
        let seconds = total / NANOS_PER_SEC as u128;
        if seconds > u64::MAX as u128 {
            return Self::MAX;
        }
        ClockValue {
            seconds: seconds as u64,
            nanoseconds: (total % NANOS_PER_SEC as u128) as u32,
        }
    }

    #[inline]
    pub fn seconds(self) -> u64 {
        self.seconds
    }

    #[inline]
    pub fn nanoseconds(self) -> u32 {
        self.nanoseconds
    }

    /// Total nanoseconds since the epoch
    #[inline]
    pub fn as_nanos(self) -> u128 {
        self.seconds as u128 * NANOS_PER_SEC as u128 + self.nanoseconds as u128
    }

    /// Shift by a signed nanosecond offset.
    ///
    /// Handles both carry and borrow across the seconds boundary. A negative
    /// offset larger than the value clamps to [`ClockValue::ZERO`].
    #[inline]
    pub fn offset_by(self, offset_ns: i128) -> Self {
        let shifted = self.as_nanos() as i128 + offset_ns;
        if shifted <= 0 {
            Self::ZERO
        } else {
            Self::from_nanos(shifted as u128)
        }
    }

    /// Signed distance `self - earlier` in nanoseconds
    #[inline]
    pub fn nanos_since(self, earlier: ClockValue) -> i128 {
        self.as_nanos() as i128 - earlier.as_nanos() as i128
    }
}

impl fmt::Debug for ClockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClockValue({}.{:09}s)", self.seconds, self.nanoseconds)
    }
}

impl fmt::Display for ClockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_carries_nanoseconds() {
        let value = ClockValue::new(1, 2_500_000_000);
        assert_eq!(value.seconds(), 3);
        assert_eq!(value.nanoseconds(), 500_000_000);
    }

    #[test]
    fn test_offset_borrows_across_second() {
        let value = ClockValue::new(10, 100);
        let shifted = value.offset_by(-200);
        assert_eq!(shifted.seconds(), 9);
        assert_eq!(shifted.nanoseconds(), 999_999_900);
    }

    #[test]
    fn test_offset_carries_across_second() {
        let value = ClockValue::new(10, 999_999_999);
        let shifted = value.offset_by(2);
        assert_eq!(shifted, ClockValue::new(11, 1));
    }

    #[test]
    fn test_offset_below_epoch_clamps() {
        let value = ClockValue::new(1, 0);
        assert_eq!(value.offset_by(-5 * NANOS_PER_SEC as i128), ClockValue::ZERO);
    }

    #[test]
    fn test_from_nanos_saturates() {
        assert_eq!(ClockValue::from_nanos(u128::MAX), ClockValue::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(ClockValue::new(5, 42).to_string(), "5.000000042");
    }

    proptest! {
        #[test]
        fn prop_offset_keeps_nanos_normalized(
            seconds in 0u64..1_000_000_000_000,
            nanos in 0u32..1_000_000_000,
            offset in any::<i64>(),
        ) {
            let value = ClockValue::new(seconds, nanos).offset_by(offset as i128);
            prop_assert!((value.nanoseconds() as u64) < NANOS_PER_SEC);
        }

        #[test]
        fn prop_nanos_roundtrip_within_range(total in 0u128..(u64::MAX as u128 * 1_000)) {
            prop_assert_eq!(ClockValue::from_nanos(total).as_nanos(), total);
        }
    }
}
