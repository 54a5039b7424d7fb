//! Protobuf representations of .NET BCL framing types used on the wire
use chrono::{DateTime as ChronoDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::proto::{FromProtobuf, IntoProtobuf};

/// Number of 100ns ticks per millisecond
const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Number of 100ns ticks per second
const TICKS_PER_SECOND: i64 = TICKS_PER_MILLISECOND * 1_000;

#[derive(Clone, Copy, Eq, PartialEq, Hash, prost::Message)]
pub struct Guid {
    #[prost(fixed64, tag = 1)]
    lo: u64,
    #[prost(fixed64, tag = 2)]
    hi: u64,
}

impl From<uuid::Uuid> for Guid {
    fn from(uuid: uuid::Uuid) -> Self {
        let (hi, lo) = uuid.as_u64_pair();
        Self { hi, lo }
    }
}

impl From<Guid> for uuid::Uuid {
    fn from(guid: Guid) -> Self {
        uuid::Uuid::from_u64_pair(guid.hi, guid.lo)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, prost::Enumeration)]
#[repr(i32)]
pub enum TimeSpanScale {
    Days = 0,
    Hours = 1,
    Minutes = 2,
    Seconds = 3,
    Milliseconds = 4,
    Ticks = 5,
    MinMax = 15,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, prost::Enumeration)]
#[repr(i32)]
pub enum DateTimeKind {
    Unspecified = 0,
    Utc = 1,
    Local = 2,
}

/// A point in time, expressed as a scaled offset from the Unix epoch.
///
/// Timestamps exchanged between peers are always UTC. Reading back a `Local` timestamp is an
/// error; the `Utc` kind is preserved across a round-trip.
#[derive(Copy, Clone, Eq, PartialEq, prost::Message)]
pub struct DateTime {
    #[prost(int64, tag = 1)]
    pub value: i64,

    #[prost(enumeration = "TimeSpanScale", tag = 2)]
    pub scale: i32,

    #[prost(enumeration = "DateTimeKind", tag = 3)]
    pub kind: i32,
}

#[derive(Debug, Error)]
pub enum DateTimeError {
    /// The wire representation carried a non-UTC kind
    #[error("expected an UTC timestamp, got kind {0}")]
    NotUtc(i32),

    /// The wire representation carried an unsupported scale
    #[error("unsupported timestamp scale {0}")]
    UnsupportedScale(i32),

    /// The timestamp does not fit in the supported range
    #[error("timestamp out of range")]
    OutOfRange,
}

impl TryFrom<DateTime> for ChronoDateTime<Utc> {
    type Error = DateTimeError;

    fn try_from(value: DateTime) -> Result<Self, Self::Error> {
        if value.kind == DateTimeKind::Local as i32 {
            return Err(DateTimeError::NotUtc(value.kind));
        }

        let ticks = match TimeSpanScale::try_from(value.scale)
            .map_err(|_| DateTimeError::UnsupportedScale(value.scale))?
        {
            TimeSpanScale::Days => value.value * 24 * 3600 * TICKS_PER_SECOND,
            TimeSpanScale::Hours => value.value * 3600 * TICKS_PER_SECOND,
            TimeSpanScale::Minutes => value.value * 60 * TICKS_PER_SECOND,
            TimeSpanScale::Seconds => value.value * TICKS_PER_SECOND,
            TimeSpanScale::Milliseconds => value.value * TICKS_PER_MILLISECOND,
            TimeSpanScale::Ticks => value.value,
            TimeSpanScale::MinMax => return Err(DateTimeError::OutOfRange),
        };

        let secs = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;

        Utc.timestamp_opt(secs, nanos)
            .single()
            .ok_or(DateTimeError::OutOfRange)
    }
}

impl From<ChronoDateTime<Utc>> for DateTime {
    fn from(value: ChronoDateTime<Utc>) -> Self {
        let ticks = value.timestamp() * TICKS_PER_SECOND
            + i64::from(value.timestamp_subsec_nanos()) / 100;

        Self {
            value: ticks,
            scale: TimeSpanScale::Ticks as i32,
            kind: DateTimeKind::Utc as i32,
        }
    }
}

impl IntoProtobuf for ChronoDateTime<Utc> {
    type Output = DateTime;

    fn into_protobuf(self) -> Self::Output {
        self.into()
    }
}

impl FromProtobuf for uuid::Uuid {
    type Input = Guid;

    fn from_protobuf(input: Self::Input) -> Self {
        input.into()
    }
}

/// Truncate a timestamp to millisecond granularity.
///
/// Sub-millisecond precision does not survive every storage backend; truncating at the
/// boundary keeps timestamp comparisons stable.
pub(crate) fn truncate_to_milliseconds(value: ChronoDateTime<Utc>) -> ChronoDateTime<Utc> {
    let millis = value.timestamp_millis();
    Utc.timestamp_millis_opt(millis).single().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_round_trip() {
        let uuid = uuid::Uuid::new_v4();
        let guid = Guid::from(uuid);
        assert_eq!(uuid::Uuid::from(guid), uuid);
    }

    #[test]
    fn date_time_round_trip_preserves_utc_kind() {
        let now = truncate_to_milliseconds(Utc::now());
        let wire = DateTime::from(now);

        assert_eq!(wire.kind, DateTimeKind::Utc as i32);

        let back = ChronoDateTime::<Utc>::try_from(wire).unwrap();
        assert_eq!(back, now);
    }

    #[test]
    fn local_kind_is_rejected() {
        let mut wire = DateTime::from(Utc::now());
        wire.kind = DateTimeKind::Local as i32;

        assert!(matches!(
            ChronoDateTime::<Utc>::try_from(wire),
            Err(DateTimeError::NotUtc(_))
        ));
    }

    #[test]
    fn seconds_scale_is_supported() {
        let wire = DateTime {
            value: 120,
            scale: TimeSpanScale::Seconds as i32,
            kind: DateTimeKind::Utc as i32,
        };

        let parsed = ChronoDateTime::<Utc>::try_from(wire).unwrap();
        assert_eq!(parsed, Utc.timestamp_opt(120, 0).unwrap());
    }

    #[test]
    fn truncation_drops_sub_millisecond_precision() {
        let value = Utc.timestamp_opt(42, 1_234_567).unwrap();
        let truncated = truncate_to_milliseconds(value);
        assert_eq!(truncated, Utc.timestamp_opt(42, 1_000_000).unwrap());
    }
}
