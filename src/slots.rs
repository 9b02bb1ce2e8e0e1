// 🕖 Slot Catalog - the fixed universe of bookable times
//
// Morning: every 30 minutes 07:00 - 11:30 (10 slots)
// Afternoon: every 30 minutes 13:00 - 16:30 (8 slots)
// Weekends and past dates have no slots at all.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

use crate::error::{Result, ScheduleError};

// ============================================================================
// CATALOG
// ============================================================================

/// (hour, minute) pairs of the catalog, in order.
const SLOT_TIMES: [(u32, u32); 18] = [
    (7, 0), (7, 30), (8, 0), (8, 30), (9, 0), (9, 30), (10, 0), (10, 30), (11, 0), (11, 30),
    (13, 0), (13, 30), (14, 0), (14, 30), (15, 0), (15, 30), (16, 0), (16, 30),
];

pub const MORNING_SLOTS: usize = 10;
pub const AFTERNOON_SLOTS: usize = 8;

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Every catalog time, independent of any date.
pub fn catalog() -> Vec<NaiveTime> {
    SLOT_TIMES
        .iter()
        .filter_map(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0))
        .collect()
}

/// Is `time` one of the catalog slots?
pub fn is_catalog_time(time: NaiveTime) -> bool {
    SLOT_TIMES
        .iter()
        .any(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0) == Some(time))
}

/// Weekday and not before `today`.
pub fn is_schedulable_date(date: NaiveDate, today: NaiveDate) -> bool {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    date >= today
}

/// Ordered slots for `date`; empty when the date is not schedulable.
pub fn slots_of(date: NaiveDate, today: NaiveDate) -> Vec<NaiveTime> {
    if !is_schedulable_date(date, today) {
        return Vec::new();
    }
    catalog()
}

// ============================================================================
// PARSING / FORMATTING
// ============================================================================

pub fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date(field: &'static str, text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    if text.len() != 10 {
        return Err(ScheduleError::validation(field, "expected YYYY-MM-DD"));
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|_| ScheduleError::validation(field, format!("'{}' is not a valid date", text)))
}

/// Parse a strict `HH:MM` time without checking the catalog.
pub fn parse_time(field: &'static str, text: &str) -> Result<NaiveTime> {
    let text = text.trim();
    let well_formed = text.len() == 5
        && text.as_bytes()[2] == b':'
        && text
            .bytes()
            .enumerate()
            .all(|(i, b)| i == 2 || b.is_ascii_digit());
    if !well_formed {
        return Err(ScheduleError::validation(field, "expected HH:MM"));
    }
    NaiveTime::parse_from_str(text, TIME_FORMAT)
        .map_err(|_| ScheduleError::validation(field, format!("'{}' is not a valid time", text)))
}

/// Parse `HH:MM` and require it to be a catalog slot.
pub fn parse_slot_time(field: &'static str, text: &str) -> Result<NaiveTime> {
    let time = parse_time(field, text)?;
    if !is_catalog_time(time) {
        return Err(ScheduleError::validation(
            field,
            format!("{} is not a bookable slot", format_time(time)),
        ));
    }
    Ok(time)
}

/// Serde adapter for `HH:MM` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_time(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NaiveTime, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_time("time", &text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Wednesday
    fn today() -> NaiveDate {
        date(2025, 3, 5)
    }

    #[test]
    fn test_catalog_has_18_ordered_slots() {
        let slots = catalog();
        assert_eq!(slots.len(), MORNING_SLOTS + AFTERNOON_SLOTS);
        assert_eq!(format_time(slots[0]), "07:00");
        assert_eq!(format_time(slots[MORNING_SLOTS - 1]), "11:30");
        assert_eq!(format_time(slots[MORNING_SLOTS]), "13:00");
        assert_eq!(format_time(*slots.last().unwrap()), "16:30");
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_weekends_and_past_are_not_schedulable() {
        assert!(is_schedulable_date(today(), today()));
        assert!(is_schedulable_date(date(2025, 3, 10), today()));
        assert!(!is_schedulable_date(date(2025, 3, 8), today())); // Saturday
        assert!(!is_schedulable_date(date(2025, 3, 9), today())); // Sunday
        assert!(!is_schedulable_date(date(2025, 3, 4), today())); // yesterday
    }

    #[test]
    fn test_slots_of_follows_schedulable_date() {
        assert_eq!(slots_of(date(2025, 3, 10), today()).len(), 18);
        assert!(slots_of(date(2025, 3, 8), today()).is_empty());
        assert!(slots_of(date(2025, 3, 3), today()).is_empty());
    }

    #[test]
    fn test_parse_slot_time() {
        assert_eq!(format_time(parse_slot_time("time", "09:30").unwrap()), "09:30");
        assert!(parse_slot_time("time", "12:00").is_err()); // lunch break
        assert!(parse_slot_time("time", "09:15").is_err());
        assert!(parse_slot_time("time", "9:30").is_err());
        assert!(parse_slot_time("time", "25:00").is_err());
        assert!(parse_time("time", "17:45").is_ok());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("date", "2025-03-10").unwrap(), date(2025, 3, 10));
        assert!(parse_date("date", "2025-02-30").is_err());
        assert!(parse_date("date", "10/03/2025").is_err());
        match parse_date("birth_date", "nope") {
            Err(ScheduleError::Validation { field, .. }) => assert_eq!(field, "birth_date"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
