// 🚫 Block Store - administrator-imposed unavailability
//
// Two kinds: a whole day, or one (date, time) slot. Creating a block takes the
// write lock before checking, so it cannot race a reservation for the same
// target. Removing one is unconditional.

use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{info, warn};

use crate::db::{self, insert_event, time_column, Event};
use crate::error::{is_constraint_violation, ConflictReason, Result, ScheduleError};
use crate::models::{normalize_reason, DayBlock, TimeBlock};
use crate::slots::{format_time, is_catalog_time};

const ACTOR: &str = "admin";

// ============================================================================
// LOOKUPS (used inside reservation transactions too)
// ============================================================================

pub fn day_block_exists(conn: &Connection, date: NaiveDate) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM blocked_days WHERE blocked_date = ?1",
            [date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn time_block_exists(conn: &Connection, date: NaiveDate, time: NaiveTime) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM blocked_times WHERE blocked_date = ?1 AND blocked_time = ?2",
            params![date, format_time(time)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn day_block_from_row(row: &Row) -> rusqlite::Result<DayBlock> {
    Ok(DayBlock {
        id: row.get(0)?,
        date: row.get(1)?,
        reason: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn time_block_from_row(row: &Row) -> rusqlite::Result<TimeBlock> {
    Ok(TimeBlock {
        id: row.get(0)?,
        date: row.get(1)?,
        time: time_column(row, 2)?,
        reason: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn list_day_blocks(conn: &Connection) -> Result<Vec<DayBlock>> {
    let mut stmt = conn.prepare(
        "SELECT id, blocked_date, reason, created_at FROM blocked_days ORDER BY blocked_date",
    )?;
    let blocks = stmt
        .query_map([], day_block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

pub fn list_time_blocks(conn: &Connection) -> Result<Vec<TimeBlock>> {
    let mut stmt = conn.prepare(
        "SELECT id, blocked_date, blocked_time, reason, created_at
         FROM blocked_times ORDER BY blocked_date, blocked_time",
    )?;
    let blocks = stmt
        .query_map([], time_block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

pub fn list_time_blocks_on(conn: &Connection, date: NaiveDate) -> Result<Vec<TimeBlock>> {
    let mut stmt = conn.prepare(
        "SELECT id, blocked_date, blocked_time, reason, created_at
         FROM blocked_times WHERE blocked_date = ?1 ORDER BY blocked_time",
    )?;
    let blocks = stmt
        .query_map([date], time_block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

// ============================================================================
// CREATE
// ============================================================================

/// Block a whole day. Fails if already blocked or if anyone is scheduled that day.
pub fn create_day_block(
    conn: &mut Connection,
    date: NaiveDate,
    reason: Option<&str>,
) -> Result<DayBlock> {
    let reason = normalize_reason(reason)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if day_block_exists(&tx, date)? {
        warn!(%date, "day block refused: already blocked");
        return Err(ScheduleError::Conflict(ConflictReason::DayAlreadyBlocked));
    }
    let scheduled = db::scheduled_count_on(&tx, date)?;
    if scheduled > 0 {
        warn!(%date, scheduled, "day block refused: day has scheduled appointments");
        return Err(ScheduleError::Conflict(ConflictReason::DayHasAppointments));
    }

    let created_at = Utc::now();
    let inserted = tx.execute(
        "INSERT INTO blocked_days (blocked_date, reason, created_at) VALUES (?1, ?2, ?3)",
        params![date, reason, created_at],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(ScheduleError::Conflict(ConflictReason::DayAlreadyBlocked));
        }
        Err(e) => return Err(e.into()),
    }
    let id = tx.last_insert_rowid();

    insert_event(
        &tx,
        &Event::new(
            "day_blocked",
            "day_block",
            id,
            serde_json::json!({ "date": date, "reason": reason }),
            ACTOR,
        ),
    )?;
    tx.commit()?;

    info!(id, %date, "day blocked");
    Ok(DayBlock {
        id,
        date,
        reason,
        created_at,
    })
}

/// Block one slot. Fails if already blocked or if the slot holds a scheduled appointment.
pub fn create_time_block(
    conn: &mut Connection,
    date: NaiveDate,
    time: NaiveTime,
    reason: Option<&str>,
) -> Result<TimeBlock> {
    if !is_catalog_time(time) {
        return Err(ScheduleError::validation(
            "time",
            format!("{} is not a bookable slot", format_time(time)),
        ));
    }
    let reason = normalize_reason(reason)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if time_block_exists(&tx, date, time)? {
        warn!(%date, time = %format_time(time), "time block refused: already blocked");
        return Err(ScheduleError::Conflict(ConflictReason::TimeAlreadyBlocked));
    }
    if db::scheduled_at(&tx, date, time, None)?.is_some() {
        warn!(%date, time = %format_time(time), "time block refused: slot taken");
        return Err(ScheduleError::Conflict(ConflictReason::SlotTaken));
    }

    let created_at = Utc::now();
    let inserted = tx.execute(
        "INSERT INTO blocked_times (blocked_date, blocked_time, reason, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![date, format_time(time), reason, created_at],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(ScheduleError::Conflict(ConflictReason::TimeAlreadyBlocked));
        }
        Err(e) => return Err(e.into()),
    }
    let id = tx.last_insert_rowid();

    insert_event(
        &tx,
        &Event::new(
            "time_blocked",
            "time_block",
            id,
            serde_json::json!({ "date": date, "time": format_time(time), "reason": reason }),
            ACTOR,
        ),
    )?;
    tx.commit()?;

    info!(id, %date, time = %format_time(time), "time slot blocked");
    Ok(TimeBlock {
        id,
        date,
        time,
        reason,
        created_at,
    })
}

// ============================================================================
// REMOVE
// ============================================================================

pub fn remove_day_block(conn: &mut Connection, id: i64) -> Result<()> {
    remove_block(conn, "blocked_days", "day_block", id)
}

pub fn remove_time_block(conn: &mut Connection, id: i64) -> Result<()> {
    remove_block(conn, "blocked_times", "time_block", id)
}

fn remove_block(conn: &mut Connection, table: &str, entity: &'static str, id: i64) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let deleted = tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
    if deleted == 0 {
        return Err(ScheduleError::not_found(entity, id));
    }
    insert_event(
        &tx,
        &Event::new(
            &format!("{}_removed", entity),
            entity,
            id,
            serde_json::json!({}),
            ACTOR,
        ),
    )?;
    tx.commit()?;

    info!(id, entity, "block removed");
    Ok(())
}
