//! Key permissions and the schedule a non-privileged key is limited to
//!
//! The validity check here is advisory on the client (it only gates UI
//! affordances). The lock performs the authoritative check.

use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};

use crate::tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
use crate::{Error, Result};

pub const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Access tier of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Created by setup, exactly one per lock
    Owner,
    Admin,
    Anytime,
    Scheduled(Schedule),
}

impl Permission {
    const KIND: u8 = 0x01;
    const SCHEDULE: u8 = 0x02;

    /// Owner and admin keys may manage other keys
    pub fn is_administrator(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    pub fn is_valid<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        match self {
            Self::Owner | Self::Admin | Self::Anytime => true,
            Self::Scheduled(schedule) => schedule.is_valid(now),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Self::Owner => 0,
            Self::Admin => 1,
            Self::Anytime => 2,
            Self::Scheduled(_) => 3,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Admin => f.write_str("admin"),
            Self::Anytime => f.write_str("anytime"),
            Self::Scheduled(_) => f.write_str("scheduled"),
        }
    }
}

impl TlvEncode for Permission {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.u8(Self::KIND, self.kind());
        if let Self::Scheduled(schedule) = self {
            writer.nested(Self::SCHEDULE, schedule);
        }
    }
}

impl TlvDecode for Permission {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        match reader.u8(Self::KIND)? {
            0 => Ok(Self::Owner),
            1 => Ok(Self::Admin),
            2 => Ok(Self::Anytime),
            3 => Ok(Self::Scheduled(reader.nested(Self::SCHEDULE)?)),
            other => Err(Error::invalid(format!("unknown permission {other}"))),
        }
    }
}

bitflags::bitflags! {
    /// Days of the week a scheduled key is usable, bit 0 is Sunday
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Weekdays: u8 {
        const SUNDAY = 1 << 0;
        const MONDAY = 1 << 1;
        const TUESDAY = 1 << 2;
        const WEDNESDAY = 1 << 3;
        const THURSDAY = 1 << 4;
        const FRIDAY = 1 << 5;
        const SATURDAY = 1 << 6;
    }
}

impl Weekdays {
    pub fn from_weekday(day: Weekday) -> Self {
        Self::from_bits_retain(1 << day.num_days_from_sunday())
    }
}

/// Time of day window in seconds since local midnight, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    lower: u32,
    upper: u32,
}

impl TimeInterval {
    pub const ALL_DAY: Self = Self {
        lower: 0,
        upper: SECONDS_PER_DAY,
    };

    pub fn new(lower: u32, upper: u32) -> Result<Self> {
        if upper > SECONDS_PER_DAY {
            return Err(Error::invalid(format!(
                "interval end {upper} is past the end of the day"
            )));
        }
        if lower > upper {
            return Err(Error::invalid(format!(
                "interval start {lower} is after its end {upper}"
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> u32 {
        self.upper
    }

    pub fn contains(&self, seconds: u32) -> bool {
        (self.lower..=self.upper).contains(&seconds)
    }
}

/// Expiry, weekday and time-of-day window of a scheduled key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub expiry: Option<DateTime<Utc>>,
    pub interval: TimeInterval,
    pub weekdays: Weekdays,
}

impl Schedule {
    const EXPIRY: u8 = 0x01;
    const LOWER: u8 = 0x02;
    const UPPER: u8 = 0x03;
    const WEEKDAYS: u8 = 0x04;

    /// Weekday and time of day are taken in the time zone of `now`
    pub fn is_valid<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if let Some(expiry) = self.expiry {
            if expiry <= now.with_timezone(&Utc) {
                return false;
            }
        }

        if !self.weekdays.contains(Weekdays::from_weekday(now.weekday())) {
            return false;
        }

        self.interval.contains(now.time().num_seconds_from_midnight())
    }
}

impl TlvEncode for Schedule {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        if let Some(expiry) = &self.expiry {
            writer.date(Self::EXPIRY, expiry);
        }
        writer.u32(Self::LOWER, self.interval.lower);
        writer.u32(Self::UPPER, self.interval.upper);
        writer.u8(Self::WEEKDAYS, self.weekdays.bits());
    }
}

impl TlvDecode for Schedule {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        let raw_weekdays = reader.u8(Self::WEEKDAYS)?;
        let weekdays = Weekdays::from_bits(raw_weekdays)
            .ok_or_else(|| Error::invalid(format!("weekday mask 0x{raw_weekdays:02x}")))?;

        Ok(Self {
            expiry: reader.optional_date(Self::EXPIRY)?,
            interval: TimeInterval::new(reader.u32(Self::LOWER)?, reader.u32(Self::UPPER)?)?,
            weekdays,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::{self, TlvConfig};
    use chrono::FixedOffset;

    // 2024-01-03 was a Wednesday
    fn wednesday_at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, hour, minute, 0).unwrap()
    }

    fn office_hours() -> Schedule {
        Schedule {
            expiry: None,
            interval: TimeInterval::new(9 * 3600, 17 * 3600).unwrap(),
            weekdays: Weekdays::MONDAY
                | Weekdays::TUESDAY
                | Weekdays::WEDNESDAY
                | Weekdays::THURSDAY
                | Weekdays::FRIDAY,
        }
    }

    #[test]
    fn test_valid_inside_window() {
        assert!(office_hours().is_valid(&wednesday_at(9, 0)));
        assert!(office_hours().is_valid(&wednesday_at(12, 30)));
        assert!(office_hours().is_valid(&wednesday_at(17, 0)));
    }

    #[test]
    fn test_invalid_outside_interval() {
        assert!(!office_hours().is_valid(&wednesday_at(8, 59)));
        assert!(!office_hours().is_valid(&wednesday_at(17, 1)));
    }

    #[test]
    fn test_unset_weekday_is_invalid_regardless_of_interval() {
        let mut schedule = office_hours();
        schedule.interval = TimeInterval::ALL_DAY;
        schedule.weekdays.remove(Weekdays::WEDNESDAY);

        for hour in 0..24 {
            assert!(!schedule.is_valid(&wednesday_at(hour, 0)));
        }
    }

    #[test]
    fn test_past_expiry_is_invalid_regardless_of_window() {
        let schedule = Schedule {
            expiry: Some(wednesday_at(8, 0)),
            interval: TimeInterval::ALL_DAY,
            weekdays: Weekdays::all(),
        };

        assert!(schedule.is_valid(&wednesday_at(7, 59)));
        assert!(!schedule.is_valid(&wednesday_at(8, 0)));
        assert!(!schedule.is_valid(&wednesday_at(12, 0)));
    }

    #[test]
    fn test_weekday_and_time_follow_the_given_zone() {
        // Wednesday 02:00 UTC is still Tuesday 21:00 at UTC-5
        let now = wednesday_at(2, 0).with_timezone(&FixedOffset::west_opt(5 * 3600).unwrap());
        let tuesday_evening = Schedule {
            expiry: None,
            interval: TimeInterval::new(20 * 3600, 22 * 3600).unwrap(),
            weekdays: Weekdays::TUESDAY,
        };

        assert!(tuesday_evening.is_valid(&now));
        assert!(!tuesday_evening.is_valid(&wednesday_at(2, 0)));
    }

    #[test]
    fn test_interval_bounds() {
        assert!(TimeInterval::new(0, SECONDS_PER_DAY).is_ok());
        assert!(TimeInterval::new(10, 10).is_ok());
        assert!(TimeInterval::new(11, 10).is_err());
        assert!(TimeInterval::new(0, SECONDS_PER_DAY + 1).is_err());
    }

    #[test]
    fn test_privileged_permissions_always_valid() {
        let now = wednesday_at(3, 0);
        assert!(Permission::Owner.is_valid(&now));
        assert!(Permission::Admin.is_valid(&now));
        assert!(Permission::Anytime.is_valid(&now));
        assert!(!Permission::Scheduled(office_hours()).is_valid(&now));
        assert!(Permission::Admin.is_administrator());
        assert!(!Permission::Anytime.is_administrator());
    }

    #[test]
    fn test_permission_tlv_roundtrip() {
        let config = TlvConfig::default();
        let mut schedule = office_hours();
        schedule.expiry = Some(wednesday_at(18, 0));

        let permissions = [
            Permission::Owner,
            Permission::Anytime,
            Permission::Scheduled(schedule),
        ];
        for permission in permissions {
            let bytes = tlv::encode(&permission, &config);
            assert_eq!(tlv::decode::<Permission>(&bytes, &config).unwrap(), permission);
        }
    }

    #[test]
    fn test_decode_rejects_out_of_domain_schedule() {
        let config = TlvConfig::default();

        let mut writer = tlv::TlvWriter::new(&config);
        writer.u32(Schedule::LOWER, 100);
        writer.u32(Schedule::UPPER, 50);
        writer.u8(Schedule::WEEKDAYS, 0x01);
        assert!(tlv::decode::<Schedule>(&writer.into_bytes(), &config).is_err());

        let mut writer = tlv::TlvWriter::new(&config);
        writer.u32(Schedule::LOWER, 0);
        writer.u32(Schedule::UPPER, 50);
        writer.u8(Schedule::WEEKDAYS, 0x80);
        assert!(tlv::decode::<Schedule>(&writer.into_bytes(), &config).is_err());

        let mut writer = tlv::TlvWriter::new(&config);
        writer.u8(Permission::KIND, 3);
        assert!(tlv::decode::<Permission>(&writer.into_bytes(), &config).is_err());
    }
}
