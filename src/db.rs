// 🗄️ Store - SQLite schema, connections, appointment queries, audit trail
//
// The database file is the only shared mutable resource. Every unit of work
// opens its own connection; correctness of the scheduling invariants never
// depends on an in-process lock.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::models::{Appointment, AppointmentStatus, ServiceType};
use crate::slots::format_time;

// ============================================================================
// DATABASE HANDLE
// ============================================================================

/// Location of the store plus connection settings.
///
/// Cheap to clone; holds no open connection.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    /// Create the handle and make sure the schema exists.
    pub fn open(path: impl Into<PathBuf>, busy_timeout: Duration) -> Result<Self> {
        let db = Self::new(path, busy_timeout);
        let conn = db.connect()?;
        setup_database(&conn)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection for one unit of work.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode so readers never block the writer
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS service_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS appointments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            patient_id TEXT NOT NULL CHECK (length(patient_id) = 11),
            birth_date TEXT NOT NULL,
            appointment_date TEXT NOT NULL,
            appointment_time TEXT NOT NULL,
            service_type_id INTEGER NOT NULL REFERENCES service_types(id),
            status TEXT NOT NULL CHECK (status IN ('scheduled', 'done', 'canceled')),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blocked_days (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            blocked_date TEXT NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blocked_times (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            blocked_date TEXT NOT NULL,
            blocked_time TEXT NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );",
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    // At most one scheduled appointment per slot, enforced by the store itself.
    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_scheduled_slot
            ON appointments(appointment_date, appointment_time)
            WHERE status = 'scheduled';

        CREATE UNIQUE INDEX IF NOT EXISTS idx_blocked_days_date
            ON blocked_days(blocked_date);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_blocked_times_slot
            ON blocked_times(blocked_date, blocked_time);

        CREATE INDEX IF NOT EXISTS idx_appointments_date
            ON appointments(appointment_date);

        CREATE INDEX IF NOT EXISTS idx_appointments_patient
            ON appointments(patient_id, birth_date);

        CREATE INDEX IF NOT EXISTS idx_events_entity
            ON events(entity_type, entity_id);",
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Read an `HH:MM` column.
pub(crate) fn time_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let text: String = row.get(idx)?;
    NaiveTime::parse_from_str(&text, "%H:%M")
        .map_err(|e| conversion_error(idx, format!("bad time '{}': {}", text, e)))
}

fn status_column(row: &Row, idx: usize) -> rusqlite::Result<AppointmentStatus> {
    let text: String = row.get(idx)?;
    AppointmentStatus::parse(&text).map_err(|e| conversion_error(idx, e.to_string()))
}

const APPOINTMENT_COLUMNS: &str = "a.id, a.name, a.patient_id, a.birth_date,
        a.appointment_date, a.appointment_time, a.service_type_id, s.name,
        a.status, a.created_at
    FROM appointments a
    LEFT JOIN service_types s ON s.id = a.service_type_id";

fn appointment_from_row(row: &Row) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        name: row.get(1)?,
        patient_id: row.get(2)?,
        birth_date: row.get(3)?,
        date: row.get(4)?,
        time: time_column(row, 5)?,
        service_type_id: row.get(6)?,
        service_type_name: row.get(7)?,
        status: status_column(row, 8)?,
        created_at: row.get(9)?,
    })
}

// ============================================================================
// APPOINTMENT QUERIES
// ============================================================================

pub fn get_appointment(conn: &Connection, id: i64) -> Result<Option<Appointment>> {
    let sql = format!("SELECT {} WHERE a.id = ?1", APPOINTMENT_COLUMNS);
    let appointment = conn
        .query_row(&sql, [id], appointment_from_row)
        .optional()?;
    Ok(appointment)
}

/// Id of the scheduled appointment holding (date, time), ignoring `exclude`.
pub fn scheduled_at(
    conn: &Connection,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<i64>,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM appointments
             WHERE appointment_date = ?1 AND appointment_time = ?2
               AND status = 'scheduled'
               AND (?3 IS NULL OR id <> ?3)
             LIMIT 1",
            params![date, format_time(time), exclude],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Number of scheduled appointments on `date`.
pub fn scheduled_count_on(conn: &Connection, date: NaiveDate) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE appointment_date = ?1 AND status = 'scheduled'",
        [date],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Times on `date` held by scheduled appointments.
pub fn scheduled_times_on(conn: &Connection, date: NaiveDate) -> Result<Vec<NaiveTime>> {
    let mut stmt = conn.prepare(
        "SELECT appointment_time FROM appointments
         WHERE appointment_date = ?1 AND status = 'scheduled'
         ORDER BY appointment_time",
    )?;
    let times = stmt
        .query_map([date], |row| time_column(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(times)
}

pub fn get_all_appointments(conn: &Connection) -> Result<Vec<Appointment>> {
    let sql = format!(
        "SELECT {} ORDER BY a.appointment_date, a.appointment_time, a.id",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map([], appointment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(appointments)
}

/// Appointments with `start <= date <= end`, ordered by slot.
pub fn get_appointments_between(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Appointment>> {
    let sql = format!(
        "SELECT {} WHERE a.appointment_date >= ?1 AND a.appointment_date <= ?2
         ORDER BY a.appointment_date, a.appointment_time, a.id",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map(params![start, end], appointment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(appointments)
}

/// Scheduled appointments in `[from, to]`, soonest first.
pub fn get_upcoming_scheduled(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    limit: u32,
) -> Result<Vec<Appointment>> {
    let sql = format!(
        "SELECT {} WHERE a.status = 'scheduled'
           AND a.appointment_date >= ?1 AND a.appointment_date <= ?2
         ORDER BY a.appointment_date, a.appointment_time
         LIMIT ?3",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map(params![from, to, limit], appointment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(appointments)
}

/// A patient's own appointments, newest first.
pub fn get_appointments_for_patient(
    conn: &Connection,
    patient_id: &str,
    birth_date: NaiveDate,
) -> Result<Vec<Appointment>> {
    let sql = format!(
        "SELECT {} WHERE a.patient_id = ?1 AND a.birth_date = ?2
         ORDER BY a.appointment_date DESC, a.appointment_time DESC",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let appointments = stmt
        .query_map(params![patient_id, birth_date], appointment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(appointments)
}

/// Admin listing filter
#[derive(Debug, Clone)]
pub struct AppointmentFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl Default for AppointmentFilter {
    fn default() -> Self {
        Self {
            date: None,
            status: None,
            page: 1,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentPage {
    pub data: Vec<Appointment>,
    pub pagination: Pagination,
}

/// Filtered, paginated listing, newest slot first.
pub fn list_appointments(conn: &Connection, filter: &AppointmentFilter) -> Result<AppointmentPage> {
    let page = filter.page.max(1);
    let limit = filter.limit.max(1);
    let offset = i64::from(page - 1) * i64::from(limit);
    let status = filter.status.map(|s| s.as_str());

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments a
         WHERE (?1 IS NULL OR a.appointment_date = ?1)
           AND (?2 IS NULL OR a.status = ?2)",
        params![filter.date, status],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} WHERE (?1 IS NULL OR a.appointment_date = ?1)
           AND (?2 IS NULL OR a.status = ?2)
         ORDER BY a.appointment_date DESC, a.appointment_time DESC, a.id DESC
         LIMIT ?3 OFFSET ?4",
        APPOINTMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let data = stmt
        .query_map(params![filter.date, status, limit, offset], appointment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let limit_i64 = i64::from(limit);
    Ok(AppointmentPage {
        data,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit_i64 - 1) / limit_i64,
        },
    })
}

// ============================================================================
// SERVICE TYPES (read side + seeding; editing lives outside this crate)
// ============================================================================

fn service_type_from_row(row: &Row) -> rusqlite::Result<ServiceType> {
    Ok(ServiceType {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get(2)?,
    })
}

pub fn insert_service_type(conn: &Connection, name: &str) -> Result<ServiceType> {
    conn.execute(
        "INSERT INTO service_types (name, is_active) VALUES (?1, 1)",
        [name.trim()],
    )?;
    Ok(ServiceType {
        id: conn.last_insert_rowid(),
        name: name.trim().to_string(),
        is_active: true,
    })
}

pub fn get_service_type(conn: &Connection, id: i64) -> Result<Option<ServiceType>> {
    let service = conn
        .query_row(
            "SELECT id, name, is_active FROM service_types WHERE id = ?1",
            [id],
            service_type_from_row,
        )
        .optional()?;
    Ok(service)
}

pub fn list_active_service_types(conn: &Connection) -> Result<Vec<ServiceType>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, is_active FROM service_types WHERE is_active = 1 ORDER BY name",
    )?;
    let services = stmt
        .query_map([], service_type_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(services)
}

/// Insert `names` only when the catalog is empty. Returns how many were added.
pub fn seed_service_types(conn: &Connection, names: &[String]) -> Result<usize> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM service_types", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }
    let mut inserted = 0;
    for name in names.iter().filter(|n| !n.trim().is_empty()) {
        insert_service_type(conn, name)?;
        inserted += 1;
    }
    Ok(inserted)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Event for audit trail: every committed write leaves one behind.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: i64,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp,
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: i64,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id.to_string()], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: row.get(1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| conversion_error(5, e.to_string()))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory store with one active service type (id 1).
    pub fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_service_type(&conn, "Consulta").unwrap();
        conn
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Wednesday 2025-03-05
    pub fn today() -> NaiveDate {
        date(2025, 3, 5)
    }

    /// Monday after `today()`
    pub fn next_monday() -> NaiveDate {
        date(2025, 3, 10)
    }

    /// Raw insert that skips every engine check.
    pub fn insert_raw_appointment(
        conn: &Connection,
        date: NaiveDate,
        time: NaiveTime,
        status: AppointmentStatus,
    ) -> i64 {
        conn.execute(
            "INSERT INTO appointments (name, patient_id, birth_date, appointment_date,
                appointment_time, service_type_id, status, created_at)
             VALUES ('Raw Patient', '98765432100', '1980-01-01', ?1, ?2, 1, ?3, ?4)",
            params![date, format_time(time), status.as_str(), Utc::now()],
        )
        .unwrap();
        conn.last_insert_rowid()
    }
}
