// 🗓️ Availability Resolver - which catalog slots are bookable on a date
//
// Day blocks, time blocks and scheduled appointments are read inside a single
// read transaction so the answer reflects one snapshot of the store. The
// answer may go stale right after it is returned; reserve re-validates before
// writing.

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::blocks;
use crate::db;
use crate::error::Result;
use crate::slots::{self, hhmm};

// ============================================================================
// SLOT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Free,
    /// Covered by a day or time block
    Blocked,
    /// Held by a scheduled appointment
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotAvailability {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub status: SlotStatus,
}

impl SlotAvailability {
    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }
}

// ============================================================================
// RESOLVE
// ============================================================================

/// Ordered slots of `date` tagged free / blocked / reserved.
///
/// Empty for weekends and dates before `today`.
pub fn get_availability(
    conn: &mut Connection,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<Vec<SlotAvailability>> {
    let catalog = slots::slots_of(date, today);
    if catalog.is_empty() {
        return Ok(Vec::new());
    }

    let tx = conn.transaction()?;
    let day_blocked = blocks::day_block_exists(&tx, date)?;
    let blocked: HashSet<NaiveTime> = blocks::list_time_blocks_on(&tx, date)?
        .into_iter()
        .map(|b| b.time)
        .collect();
    let reserved: HashSet<NaiveTime> = db::scheduled_times_on(&tx, date)?.into_iter().collect();
    tx.commit()?;

    let availability: Vec<SlotAvailability> = catalog
        .into_iter()
        .map(|time| {
            let status = if day_blocked || blocked.contains(&time) {
                SlotStatus::Blocked
            } else if reserved.contains(&time) {
                SlotStatus::Reserved
            } else {
                SlotStatus::Free
            };
            SlotAvailability { time, status }
        })
        .collect();

    debug!(
        %date,
        free = availability.iter().filter(|s| s.is_free()).count(),
        "availability resolved"
    );
    Ok(availability)
}

pub fn count_free(slots: &[SlotAvailability]) -> usize {
    slots.iter().filter(|s| s.is_free()).count()
}

/// Just the free times of `date`.
pub fn free_slots(conn: &mut Connection, date: NaiveDate, today: NaiveDate) -> Result<Vec<NaiveTime>> {
    Ok(get_availability(conn, date, today)?
        .into_iter()
        .filter(SlotAvailability::is_free)
        .map(|s| s.time)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::models::AppointmentStatus;

    #[test]
    fn test_empty_store_all_free() {
        let mut conn = memory_db();
        let slots = get_availability(&mut conn, next_monday(), today()).unwrap();
        assert_eq!(slots.len(), 18);
        assert!(slots.iter().all(SlotAvailability::is_free));
    }

    #[test]
    fn test_weekend_and_past_are_empty() {
        let mut conn = memory_db();
        assert!(get_availability(&mut conn, date(2025, 3, 8), today()).unwrap().is_empty());
        assert!(get_availability(&mut conn, date(2025, 3, 4), today()).unwrap().is_empty());
    }

    #[test]
    fn test_day_block_blocks_everything() {
        let mut conn = memory_db();
        let d = next_monday();
        blocks::create_day_block(&mut conn, d, Some("Congress")).unwrap();

        let slots = get_availability(&mut conn, d, today()).unwrap();
        assert_eq!(slots.len(), 18);
        assert!(slots.iter().all(|s| s.status == SlotStatus::Blocked));
        assert!(free_slots(&mut conn, d, today()).unwrap().is_empty());
    }

    #[test]
    fn test_time_block_and_reservation_are_not_free() {
        let mut conn = memory_db();
        let d = next_monday();
        blocks::create_time_block(&mut conn, d, time(9, 0), None).unwrap();
        insert_raw_appointment(&conn, d, time(10, 0), AppointmentStatus::Scheduled);
        insert_raw_appointment(&conn, d, time(11, 0), AppointmentStatus::Canceled);

        let slots = get_availability(&mut conn, d, today()).unwrap();
        let status_of = |t: NaiveTime| slots.iter().find(|s| s.time == t).unwrap().status;
        assert_eq!(status_of(time(9, 0)), SlotStatus::Blocked);
        assert_eq!(status_of(time(10, 0)), SlotStatus::Reserved);
        assert_eq!(status_of(time(11, 0)), SlotStatus::Free);
        assert_eq!(count_free(&slots), 16);

        let free = free_slots(&mut conn, d, today()).unwrap();
        assert_eq!(free.len(), 16);
        assert!(!free.contains(&time(9, 0)));
        assert!(!free.contains(&time(10, 0)));
    }

    #[test]
    fn test_serializes_with_hhmm_and_lowercase_status() {
        let slot = SlotAvailability { time: time(7, 30), status: SlotStatus::Reserved };
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json, serde_json::json!({"time": "07:30", "status": "reserved"}));
    }
}
