//! FAT timestamps.
//!
//! Packed layout (`DWORD`, as returned by `get_fattime`):
//!
//! ```text
//! 31..25 year - 1980 | 24..21 month | 20..16 day | 15..11 hour | 10..5 minute | 4..0 second / 2
//! ```

/// Calendar date and time representable in a FAT timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FatDateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl FatDateTime {
    /// 1980-01-01 00:00:00, the FAT epoch.
    pub const EPOCH: Self = Self {
        year: 1980,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Validate and build a timestamp. Years 1980..=2107 are representable.
    #[must_use]
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<Self> {
        let valid = (1980..=2107).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour < 24
            && minute < 60
            && second < 60;
        valid.then_some(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Year, 1980..=2107.
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Month, 1..=12.
    pub fn month(&self) -> u8 {
        self.month
    }

    /// Day of month, 1..=31.
    pub fn day(&self) -> u8 {
        self.day
    }

    /// Hour, 0..=23.
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute, 0..=59.
    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Second, 0..=59. FAT stores it with 2 s resolution.
    pub fn second(&self) -> u8 {
        self.second
    }

    /// Packed FAT representation. Odd seconds round down.
    #[must_use]
    pub fn pack(&self) -> u32 {
        let year = u32::from(self.year.saturating_sub(1980));
        year.wrapping_shl(25)
            | u32::from(self.month).wrapping_shl(21)
            | u32::from(self.day).wrapping_shl(16)
            | u32::from(self.hour).wrapping_shl(11)
            | u32::from(self.minute).wrapping_shl(5)
            | u32::from(self.second).wrapping_shr(1)
    }

    /// Decode a packed timestamp, or `None` if a field is out of range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // every field is masked first
    pub fn unpack(packed: u32) -> Option<Self> {
        let field = |shift: u32, mask: u32| (packed.wrapping_shr(shift) & mask) as u8;
        Self::new(
            1980u16.saturating_add(u16::from(field(25, 0x7F))),
            field(21, 0x0F),
            field(16, 0x1F),
            field(11, 0x1F),
            field(5, 0x3F),
            field(0, 0x1F).saturating_mul(2),
        )
    }
}

/// Wall-clock source for file timestamps, typically an RTC.
pub trait TimeSource {
    /// Current local time, or `None` if the clock has not been set.
    fn now(&self) -> Option<FatDateTime>;
}

/// Time source for boards without a real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl TimeSource for NoClock {
    fn now(&self) -> Option<FatDateTime> {
        None
    }
}

/// Packed timestamp for new or modified files.
///
/// Falls back to [`FatDateTime::EPOCH`] when the source has no time, so the
/// filesystem always gets a valid (if wrong) date.
pub fn fat_timestamp(source: &impl TimeSource) -> u32 {
    source.now().unwrap_or(FatDateTime::EPOCH).pack()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    struct FixedRtc(FatDateTime);

    impl TimeSource for FixedRtc {
        fn now(&self) -> Option<FatDateTime> {
            Some(self.0)
        }
    }

    #[test]
    fn no_clock_yields_fat_epoch() {
        assert_eq!(fat_timestamp(&NoClock), (1 << 16) | (1 << 21));
    }

    #[test]
    fn rtc_time_is_packed() {
        let t = FatDateTime::new(2024, 3, 15, 13, 45, 30).unwrap();
        let packed = fat_timestamp(&FixedRtc(t));
        assert_eq!(packed >> 25, 44);
        assert_eq!((packed >> 21) & 0x0F, 3);
        assert_eq!((packed >> 16) & 0x1F, 15);
        assert_eq!((packed >> 11) & 0x1F, 13);
        assert_eq!((packed >> 5) & 0x3F, 45);
        assert_eq!(packed & 0x1F, 15);
        assert_eq!(FatDateTime::unpack(packed), Some(t));
    }

    #[test]
    fn odd_seconds_round_down() {
        let t = FatDateTime::new(2000, 1, 1, 0, 0, 59).unwrap();
        assert_eq!(FatDateTime::unpack(t.pack()).unwrap().second(), 58);
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        assert!(FatDateTime::new(1979, 1, 1, 0, 0, 0).is_none());
        assert!(FatDateTime::new(2108, 1, 1, 0, 0, 0).is_none());
        assert!(FatDateTime::new(2000, 13, 1, 0, 0, 0).is_none());
        assert!(FatDateTime::new(2000, 1, 0, 0, 0, 0).is_none());
        assert!(FatDateTime::new(2000, 1, 1, 24, 0, 0).is_none());
        assert_eq!(FatDateTime::unpack(0), None, "month 0 is invalid");
    }
}
