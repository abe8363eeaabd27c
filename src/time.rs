//! Compound time tags: CP16Time2a, CP24Time2a and CP56Time2a.
//!
//! The wire carries no time zone and no century. Reconstruction therefore
//! takes a reference instant (CP24) or a zone plus century base (CP56)
//! known out of band; an invalid tag reconstructs to "no time".

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};

/// Elapsed time in milliseconds, up to a minute. Two octets, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp16Time2a(pub u16);

impl Cp16Time2a {
    pub fn from_bytes(b: [u8; 2]) -> Self {
        Cp16Time2a(u16::from_le_bytes(b))
    }

    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Elapsed milliseconds.
    pub fn millis(self) -> u16 {
        self.0
    }
}

/// Three octet time tag: milliseconds within the minute plus the minute,
/// with an invalid flag and one reserved bit. The hour and everything above
/// it is implied by a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp24Time2a {
    /// Milliseconds within the minute, 0..=59999
    pub millis: u16,
    /// Minute of the hour, 0..=59
    pub minute: u8,
    /// IV: the tag carries no usable time
    pub invalid: bool,
    /// RES1
    pub reserved: bool,
}

impl Cp24Time2a {
    pub fn from_bytes(b: [u8; 3]) -> Self {
        Cp24Time2a {
            millis: u16::from_le_bytes([b[0], b[1]]),
            minute: b[2] & 0x3F,
            invalid: b[2] & 0x80 != 0,
            reserved: b[2] & 0x40 != 0,
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        let ms = self.millis.to_le_bytes();
        let mut min = self.minute & 0x3F;
        if self.reserved {
            min |= 0x40;
        }
        if self.invalid {
            min |= 0x80;
        }
        [ms[0], ms[1], min]
    }

    /// Tag the minute, second and millisecond of an instant.
    pub fn from_datetime<Tz: TimeZone>(t: &DateTime<Tz>) -> Self {
        Cp24Time2a {
            millis: (t.second() * 1000 + t.timestamp_subsec_millis()) as u16,
            minute: t.minute() as u8,
            invalid: false,
            reserved: false,
        }
    }

    /// Reconstruct the instant under the assumption that it lies within the
    /// hour preceding `reference`, i.e. in `(reference − 1h, reference]`.
    /// The reference supplies the date and the hour; when the tag's
    /// minute places the result after the reference, the previous hour is
    /// meant. Returns `None` when the invalid flag is set or a field is out
    /// of range.
    pub fn to_datetime<Tz: TimeZone>(&self, reference: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if self.invalid || self.minute > 59 || self.millis > 59_999 {
            return None;
        }
        let candidate = reference
            .with_minute(u32::from(self.minute))?
            .with_second(u32::from(self.millis / 1000))?
            .with_nanosecond(u32::from(self.millis % 1000) * 1_000_000)?;
        if candidate > *reference {
            Some(candidate - Duration::hours(1))
        } else {
            Some(candidate)
        }
    }
}

/// Seven octet absolute time tag, zone-free and with a two digit year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp56Time2a {
    /// Milliseconds within the minute, 0..=59999
    pub millis: u16,
    /// Minute of the hour, 0..=59
    pub minute: u8,
    /// Hour of the day, 0..=23
    pub hour: u8,
    /// SU: summer time in effect
    pub summer_time: bool,
    /// Day of the month, 1..=31
    pub day_of_month: u8,
    /// Day of the week, 1..=7 (Monday = 1); 0 when unused
    pub day_of_week: u8,
    /// Month of the year, 1..=12
    pub month: u8,
    /// Year within the century, 0..=99
    pub year: u8,
    /// IV: the tag carries no usable time
    pub invalid: bool,
}

impl Cp56Time2a {
    pub fn from_bytes(b: [u8; 7]) -> Self {
        Cp56Time2a {
            millis: u16::from_le_bytes([b[0], b[1]]),
            minute: b[2] & 0x3F,
            invalid: b[2] & 0x80 != 0,
            hour: b[3] & 0x1F,
            summer_time: b[3] & 0x80 != 0,
            day_of_month: b[4] & 0x1F,
            day_of_week: (b[4] >> 5) & 0x07,
            month: b[5] & 0x0F,
            year: b[6] & 0x7F,
        }
    }

    pub fn to_bytes(self) -> [u8; 7] {
        let ms = self.millis.to_le_bytes();
        let mut min = self.minute & 0x3F;
        if self.invalid {
            min |= 0x80;
        }
        let mut hour = self.hour & 0x1F;
        if self.summer_time {
            hour |= 0x80;
        }
        let day = (self.day_of_month & 0x1F) | ((self.day_of_week & 0x07) << 5);
        [ms[0], ms[1], min, hour, day, self.month & 0x0F, self.year & 0x7F]
    }

    /// Tag an instant. The zone offset is dropped; the century is kept only
    /// as the low two digits of the year.
    pub fn from_datetime<Tz: TimeZone>(t: &DateTime<Tz>) -> Self {
        Cp56Time2a {
            millis: (t.second() * 1000 + t.timestamp_subsec_millis()) as u16,
            minute: t.minute() as u8,
            hour: t.hour() as u8,
            summer_time: false,
            day_of_month: t.day() as u8,
            day_of_week: t.weekday().number_from_monday() as u8,
            month: t.month() as u8,
            year: (t.year() % 100) as u8,
            invalid: false,
        }
    }

    /// Reconstruct the instant in `zone`, with `century` as the year base
    /// (e.g. 2000 turns year 26 into 2026). Returns `None` when the invalid
    /// flag is set or a field is out of range.
    pub fn to_datetime<Tz: TimeZone>(&self, zone: &Tz, century: i32) -> Option<DateTime<Tz>> {
        if self.invalid || self.minute > 59 || self.millis > 59_999 {
            return None;
        }
        let t = zone
            .with_ymd_and_hms(
                century + i32::from(self.year),
                u32::from(self.month),
                u32::from(self.day_of_month),
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.millis / 1000),
            )
            .single()?;
        Some(t + Duration::milliseconds(i64::from(self.millis % 1000)))
    }
}
