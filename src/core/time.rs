use std::sync::{Arc, Mutex};

use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};

/// Source of wall-clock time for anything that compares against server timestamps.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, value: OffsetDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = value;
    }

    pub fn advance(&self, by: time::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Parses a server timestamp. Offset-less values are UTC.
pub fn parse_server_timestamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    let trimmed = raw.trim();
    if let Ok(value) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(value);
    }

    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(trimmed, naive).map(PrimitiveDateTime::assume_utc)
}

pub fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

pub(crate) mod server_timestamp {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub(crate) fn serialize<S: Serializer>(
        value: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_offset(*value))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_server_timestamp(&raw)
            .map_err(|err| D::Error::custom(format!("invalid timestamp '{raw}': {err}")))
    }

    pub(crate) mod option {
        use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        pub(crate) fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&super::super::format_offset(*value)),
                None => serializer.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|raw| {
                super::super::parse_server_timestamp(&raw)
                    .map_err(|err| D::Error::custom(format!("invalid timestamp '{raw}': {err}")))
            })
            .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Month, Time, UtcOffset};

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_server_timestamp("2025-01-02T13:20:30+03:00").unwrap();
        assert_eq!(parsed.to_offset(UtcOffset::UTC).hour(), 10);
    }

    #[test]
    fn parses_naive_timestamp_as_utc() {
        let parsed = parse_server_timestamp("2025-01-02T10:20:30.123456").unwrap();
        let date = Date::from_calendar_date(2025, Month::January, 2).unwrap();
        let time = Time::from_hms_micro(10, 20, 30, 123_456).unwrap();
        assert_eq!(parsed, PrimitiveDateTime::new(date, time).assume_utc());
    }

    #[test]
    fn parses_naive_timestamp_without_fraction() {
        let parsed = parse_server_timestamp("2025-01-02T10:20:30").unwrap();
        assert_eq!(parsed.offset(), UtcOffset::UTC);
        assert_eq!(parsed.second(), 30);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_server_timestamp("next tuesday").is_err());
    }

    #[test]
    fn format_offset_preserves_offset() {
        let date = Date::from_calendar_date(2025, Month::January, 2).unwrap();
        let time = Time::from_hms(10, 20, 30).unwrap();
        let utc = PrimitiveDateTime::new(date, time).assume_utc();
        let shifted = utc.to_offset(UtcOffset::from_hms(3, 0, 0).unwrap());
        assert_eq!(format_offset(shifted), "2025-01-02T13:20:30+03:00");
    }

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_utc(), start);
        clock.advance(time::Duration::minutes(10));
        assert_eq!(clock.now_utc(), start + time::Duration::minutes(10));
    }
}
