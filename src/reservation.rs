// 🔒 Reservation Manager - atomic check-and-create
//
// The only code that turns a slot into a scheduled appointment. Every path that
// can make a slot occupied (reserve, reopen) runs its checks and its write
// inside one IMMEDIATE transaction: SQLite grants the database write lock
// before the first check, so two writers can never both observe an empty slot.
// The partial unique index on scheduled slots backs this up at commit time.

use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{info, warn};

use crate::blocks::{day_block_exists, time_block_exists};
use crate::db::{self, insert_event, Event};
use crate::error::{is_constraint_violation, ConflictReason, Result, ScheduleError};
use crate::models::{
    normalize_name, normalize_patient_id, Appointment, AppointmentStatus, NewAppointment,
};
use crate::slots::{self, format_time};

const ENTITY: &str = "appointment";

// ============================================================================
// SLOT CHECKS
// ============================================================================

/// Checks 1-3, in order. Must run inside the caller's write transaction.
fn ensure_slot_open(
    conn: &Connection,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<i64>,
) -> Result<()> {
    if day_block_exists(conn, date)? {
        return Err(ScheduleError::Conflict(ConflictReason::DayBlocked));
    }
    if time_block_exists(conn, date, time)? {
        return Err(ScheduleError::Conflict(ConflictReason::TimeBlocked));
    }
    if db::scheduled_at(conn, date, time, exclude)?.is_some() {
        return Err(ScheduleError::Conflict(ConflictReason::SlotTaken));
    }
    Ok(())
}

/// Map a unique-index hit on the scheduled slot to `slot_taken`.
fn slot_write_error(err: rusqlite::Error) -> ScheduleError {
    if is_constraint_violation(&err) {
        ScheduleError::Conflict(ConflictReason::SlotTaken)
    } else {
        err.into()
    }
}

// ============================================================================
// RESERVE
// ============================================================================

/// Reserve a free slot for a patient.
///
/// Input problems come back as `Validation`; an occupied or blocked target as
/// `Conflict`. Nothing is written unless every check passes.
pub fn reserve(conn: &mut Connection, request: &NewAppointment, today: NaiveDate) -> Result<Appointment> {
    // Preconditions (no store access)
    let name = normalize_name(&request.name)?;
    let patient_id = normalize_patient_id(&request.patient_id)?;
    if request.birth_date > today {
        return Err(ScheduleError::validation("birth_date", "must not be in the future"));
    }
    if !slots::slots_of(request.date, today).contains(&request.time) {
        let message = if slots::is_schedulable_date(request.date, today) {
            format!("{} is not a bookable slot", format_time(request.time))
        } else {
            format!("{} is not a schedulable date", request.date)
        };
        return Err(ScheduleError::validation(
            if slots::is_catalog_time(request.time) { "date" } else { "time" },
            message,
        ));
    }
    if request.service_type_id < 1 {
        return Err(ScheduleError::validation("service_type_id", "must be a positive id"));
    }

    let date = request.date;
    let time = request.time;

    // Atomic section
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Err(e) = ensure_slot_open(&tx, date, time, None) {
        warn!(%date, time = %format_time(time), error = %e, "reservation refused");
        return Err(e);
    }

    match db::get_service_type(&tx, request.service_type_id)? {
        Some(service) if service.is_active => {}
        _ => {
            return Err(ScheduleError::validation(
                "service_type_id",
                format!("service type {} is not available", request.service_type_id),
            ));
        }
    }

    let created_at = Utc::now();
    tx.execute(
        "INSERT INTO appointments (
            name, patient_id, birth_date, appointment_date, appointment_time,
            service_type_id, status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', ?7)",
        params![
            name,
            patient_id,
            request.birth_date,
            date,
            format_time(time),
            request.service_type_id,
            created_at,
        ],
    )
    .map_err(slot_write_error)?;
    let id = tx.last_insert_rowid();

    insert_event(
        &tx,
        &Event::new(
            "appointment_reserved",
            ENTITY,
            id,
            serde_json::json!({
                "date": date,
                "time": format_time(time),
                "service_type_id": request.service_type_id,
            }),
            "booking",
        ),
    )?;

    let appointment = db::get_appointment(&tx, id)?.ok_or_else(|| ScheduleError::not_found(ENTITY, id))?;
    tx.commit().map_err(slot_write_error)?;

    info!(id, %date, time = %format_time(time), "appointment reserved");
    Ok(appointment)
}

// ============================================================================
// REOPEN / STATUS
// ============================================================================

/// Move a done or canceled appointment back to scheduled.
///
/// The slot may have been claimed or blocked meanwhile; on conflict the stored
/// status stays untouched.
pub fn reopen(conn: &mut Connection, id: i64) -> Result<Appointment> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = db::get_appointment(&tx, id)?.ok_or_else(|| ScheduleError::not_found(ENTITY, id))?;
    if current.status == AppointmentStatus::Scheduled {
        return Ok(current);
    }

    if let Err(e) = ensure_slot_open(&tx, current.date, current.time, Some(id)) {
        warn!(id, date = %current.date, time = %format_time(current.time), error = %e, "reopen refused");
        return Err(e);
    }

    tx.execute(
        "UPDATE appointments SET status = 'scheduled' WHERE id = ?1",
        [id],
    )
    .map_err(slot_write_error)?;
    record_transition(&tx, id, current.status, AppointmentStatus::Scheduled)?;

    let updated = db::get_appointment(&tx, id)?.ok_or_else(|| ScheduleError::not_found(ENTITY, id))?;
    tx.commit().map_err(slot_write_error)?;

    info!(id, from = %current.status, "appointment reopened");
    Ok(updated)
}

/// Apply a status transition.
///
/// Vacating transitions (to done or canceled) never conflict. Transitions back
/// to scheduled go through `reopen`. Setting the current status is a no-op.
pub fn set_status(conn: &mut Connection, id: i64, new_status: AppointmentStatus) -> Result<Appointment> {
    if new_status == AppointmentStatus::Scheduled {
        return reopen(conn, id);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = db::get_appointment(&tx, id)?.ok_or_else(|| ScheduleError::not_found(ENTITY, id))?;
    if current.status == new_status {
        return Ok(current);
    }

    tx.execute(
        "UPDATE appointments SET status = ?1 WHERE id = ?2",
        params![new_status.as_str(), id],
    )?;
    record_transition(&tx, id, current.status, new_status)?;

    let updated = db::get_appointment(&tx, id)?.ok_or_else(|| ScheduleError::not_found(ENTITY, id))?;
    tx.commit()?;

    info!(id, from = %current.status, to = %new_status, "appointment status changed");
    Ok(updated)
}

fn record_transition(
    conn: &Connection,
    id: i64,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<()> {
    insert_event(
        conn,
        &Event::new(
            "appointment_status_changed",
            ENTITY,
            id,
            serde_json::json!({ "from": from, "to": to }),
            "admin",
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::{get_availability, SlotStatus};
    use crate::blocks::{create_day_block, create_time_block};
    use crate::db::test_support::*;
    use crate::db::Database;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn request(date: NaiveDate, time: NaiveTime) -> NewAppointment {
        NewAppointment {
            name: "Maria Silva".to_string(),
            patient_id: "123.456.789-09".to_string(),
            birth_date: crate::db::test_support::date(1985, 6, 15),
            date,
            time,
            service_type_id: 1,
        }
    }

    fn scheduled_in_slot(conn: &Connection, date: NaiveDate, time: NaiveTime) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM appointments
             WHERE appointment_date = ?1 AND appointment_time = ?2 AND status = 'scheduled'",
            params![date, format_time(time)],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_reserve_next_monday_morning() {
        let mut conn = memory_db();
        let a = reserve(&mut conn, &request(next_monday(), time(7, 0)), today()).unwrap();

        assert_eq!(a.status, AppointmentStatus::Scheduled);
        assert_eq!(a.patient_id, "12345678909");
        assert_eq!(a.time, time(7, 0));
        assert_eq!(a.service_type_name.as_deref(), Some("Consulta"));

        let events = db::get_events_for_entity(&conn, ENTITY, a.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "appointment_reserved");
    }

    #[test]
    fn test_reserve_same_slot_twice_conflicts() {
        let mut conn = memory_db();
        reserve(&mut conn, &request(next_monday(), time(7, 0)), today()).unwrap();

        let err = reserve(&mut conn, &request(next_monday(), time(7, 0)), today()).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::SlotTaken));
        assert_eq!(scheduled_in_slot(&conn, next_monday(), time(7, 0)), 1);
    }

    #[test]
    fn test_reserve_on_blocked_day() {
        let mut conn = memory_db();
        let d = next_monday();
        create_day_block(&mut conn, d, None).unwrap();

        for t in [time(7, 0), time(13, 0), time(16, 30)] {
            let err = reserve(&mut conn, &request(d, t), today()).unwrap_err();
            assert_eq!(err.conflict_reason(), Some(ConflictReason::DayBlocked));
        }
        let slots = get_availability(&mut conn, d, today()).unwrap();
        assert!(slots.iter().all(|s| s.status == SlotStatus::Blocked));
    }

    #[test]
    fn test_reserve_on_blocked_time() {
        let mut conn = memory_db();
        let d = next_monday();
        create_time_block(&mut conn, d, time(9, 0), None).unwrap();

        let err = reserve(&mut conn, &request(d, time(9, 0)), today()).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::TimeBlocked));
        assert!(reserve(&mut conn, &request(d, time(9, 30)), today()).is_ok());
    }

    #[test]
    fn test_reserve_validation_errors() {
        let mut conn = memory_db();
        let d = next_monday();

        let mut bad_id = request(d, time(7, 0));
        bad_id.patient_id = "123".to_string();
        assert!(matches!(
            reserve(&mut conn, &bad_id, today()),
            Err(ScheduleError::Validation { field: "patient_id", .. })
        ));

        assert!(matches!(
            reserve(&mut conn, &request(d, time(12, 0)), today()),
            Err(ScheduleError::Validation { field: "time", .. })
        ));
        assert!(matches!(
            reserve(&mut conn, &request(date(2025, 3, 8), time(7, 0)), today()),
            Err(ScheduleError::Validation { field: "date", .. })
        ));
        assert!(matches!(
            reserve(&mut conn, &request(date(2025, 3, 3), time(7, 0)), today()),
            Err(ScheduleError::Validation { field: "date", .. })
        ));

        let mut unknown_service = request(d, time(7, 0));
        unknown_service.service_type_id = 99;
        assert!(matches!(
            reserve(&mut conn, &unknown_service, today()),
            Err(ScheduleError::Validation { field: "service_type_id", .. })
        ));

        assert_eq!(db::get_all_appointments(&conn).unwrap().len(), 0);
    }

    #[test]
    fn test_vacating_transitions_free_the_slot() {
        let mut conn = memory_db();
        let d = next_monday();
        let a = reserve(&mut conn, &request(d, time(8, 0)), today()).unwrap();

        let done = set_status(&mut conn, a.id, AppointmentStatus::Done).unwrap();
        assert_eq!(done.status, AppointmentStatus::Done);
        let canceled = set_status(&mut conn, a.id, AppointmentStatus::Canceled).unwrap();
        assert_eq!(canceled.status, AppointmentStatus::Canceled);

        assert!(reserve(&mut conn, &request(d, time(8, 0)), today()).is_ok());
    }

    #[test]
    fn test_reopen_into_taken_slot_fails_and_keeps_status() {
        let mut conn = memory_db();
        let d = next_monday();
        let first = reserve(&mut conn, &request(d, time(10, 30)), today()).unwrap();
        set_status(&mut conn, first.id, AppointmentStatus::Canceled).unwrap();
        reserve(&mut conn, &request(d, time(10, 30)), today()).unwrap();

        let err = set_status(&mut conn, first.id, AppointmentStatus::Scheduled).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::SlotTaken));

        let stored = db::get_appointment(&conn, first.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Canceled);
        assert_eq!(scheduled_in_slot(&conn, d, time(10, 30)), 1);
    }

    #[test]
    fn test_reopen_into_blocked_slot_fails() {
        let mut conn = memory_db();
        let d = next_monday();
        let a = reserve(&mut conn, &request(d, time(14, 0)), today()).unwrap();
        set_status(&mut conn, a.id, AppointmentStatus::Done).unwrap();
        create_time_block(&mut conn, d, time(14, 0), None).unwrap();

        let err = reopen(&mut conn, a.id).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::TimeBlocked));

        create_day_block(&mut conn, d, None).unwrap();
        let err = reopen(&mut conn, a.id).unwrap_err();
        assert_eq!(err.conflict_reason(), Some(ConflictReason::DayBlocked));
    }

    #[test]
    fn test_reopen_free_slot_succeeds() {
        let mut conn = memory_db();
        let a = reserve(&mut conn, &request(next_monday(), time(15, 30)), today()).unwrap();
        set_status(&mut conn, a.id, AppointmentStatus::Canceled).unwrap();

        let reopened = reopen(&mut conn, a.id).unwrap();
        assert_eq!(reopened.status, AppointmentStatus::Scheduled);

        // already scheduled: unchanged, no self-conflict
        let again = set_status(&mut conn, a.id, AppointmentStatus::Scheduled).unwrap();
        assert_eq!(again.status, AppointmentStatus::Scheduled);

        let events = db::get_events_for_entity(&conn, ENTITY, a.id).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let mut conn = memory_db();
        assert!(matches!(
            set_status(&mut conn, 404, AppointmentStatus::Done),
            Err(ScheduleError::NotFound { .. })
        ));
        assert!(matches!(reopen(&mut conn, 404), Err(ScheduleError::NotFound { .. })));
    }

    #[test]
    fn test_concurrent_reservations_one_winner() {
        const WORKERS: usize = 8;

        let dir = tempfile::tempdir().unwrap();
        let database = Database::open(dir.path().join("clinic.db"), Duration::from_secs(10)).unwrap();
        db::insert_service_type(&database.connect().unwrap(), "Consulta").unwrap();

        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let database = database.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut conn = database.connect().unwrap();
                    barrier.wait();
                    reserve(&mut conn, &request(next_monday(), time(7, 0)), today())
                })
            })
            .collect();

        let results: Vec<Result<Appointment>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let slot_taken = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.conflict_reason() == Some(ConflictReason::SlotTaken)))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(slot_taken, WORKERS - 1);

        let conn = database.connect().unwrap();
        assert_eq!(scheduled_in_slot(&conn, next_monday(), time(7, 0)), 1);
    }

    #[test]
    fn test_concurrent_block_and_reserve_never_both_win() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::open(dir.path().join("clinic.db"), Duration::from_secs(10)).unwrap();
        db::insert_service_type(&database.connect().unwrap(), "Consulta").unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let booking = {
            let database = database.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut conn = database.connect().unwrap();
                barrier.wait();
                reserve(&mut conn, &request(next_monday(), time(9, 0)), today()).is_ok()
            })
        };
        let blocking = {
            let database = database.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut conn = database.connect().unwrap();
                barrier.wait();
                create_time_block(&mut conn, next_monday(), time(9, 0), None).is_ok()
            })
        };

        let booked = booking.join().unwrap();
        let blocked = blocking.join().unwrap();
        assert!(booked ^ blocked, "exactly one of booking/blocking must win");
    }

    #[test]
    fn test_concurrent_reopen_and_reserve_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::open(dir.path().join("clinic.db"), Duration::from_secs(10)).unwrap();
        db::insert_service_type(&database.connect().unwrap(), "Consulta").unwrap();

        let original = {
            let mut conn = database.connect().unwrap();
            let appt = reserve(&mut conn, &request(next_monday(), time(10, 0)), today()).unwrap();
            set_status(&mut conn, appt.id, AppointmentStatus::Canceled).unwrap();
            appt
        };

        let barrier = Arc::new(Barrier::new(2));
        let reopening = {
            let database = database.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut conn = database.connect().unwrap();
                barrier.wait();
                reopen(&mut conn, original.id)
            })
        };
        let booking = {
            let database = database.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut conn = database.connect().unwrap();
                barrier.wait();
                reserve(&mut conn, &request(next_monday(), time(10, 0)), today())
            })
        };

        let reopened = reopening.join().unwrap();
        let booked = booking.join().unwrap();
        assert!(reopened.is_ok() ^ booked.is_ok(), "exactly one of reopen/reserve must win");
        let loser = if reopened.is_ok() { booked.err() } else { reopened.err() };
        assert_eq!(loser.and_then(|e| e.conflict_reason()), Some(ConflictReason::SlotTaken));

        let conn = database.connect().unwrap();
        assert_eq!(scheduled_in_slot(&conn, next_monday(), time(10, 0)), 1);
    }

    #[test]
    fn test_concurrent_day_block_and_reserve_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::open(dir.path().join("clinic.db"), Duration::from_secs(10)).unwrap();
        db::insert_service_type(&database.connect().unwrap(), "Consulta").unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let booking = {
            let database = database.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut conn = database.connect().unwrap();
                barrier.wait();
                reserve(&mut conn, &request(next_monday(), time(14, 0)), today())
            })
        };
        let blocking = {
            let database = database.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let mut conn = database.connect().unwrap();
                barrier.wait();
                create_day_block(&mut conn, next_monday(), Some("Feriado"))
            })
        };

        let booked = booking.join().unwrap();
        let blocked = blocking.join().unwrap();
        assert!(booked.is_ok() ^ blocked.is_ok(), "exactly one of booking/day block must win");

        let conn = database.connect().unwrap();
        match booked {
            Ok(_) => {
                assert_eq!(
                    blocked.unwrap_err().conflict_reason(),
                    Some(ConflictReason::DayHasAppointments)
                );
                assert!(!crate::blocks::day_block_exists(&conn, next_monday()).unwrap());
            }
            Err(e) => {
                assert_eq!(e.conflict_reason(), Some(ConflictReason::DayBlocked));
                assert_eq!(scheduled_in_slot(&conn, next_monday(), time(14, 0)), 0);
            }
        }
    }
}
