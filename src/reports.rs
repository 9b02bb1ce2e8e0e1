// 📊 Report Aggregator - read-only grouping of appointments
//
// Pure functions over a snapshot. Slight staleness against concurrent writes
// is fine here; nothing is protected.

use chrono::{Datelike, Duration, Months, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db;
use crate::error::{Result, ScheduleError};
use crate::models::{Appointment, AppointmentStatus};

/// Bucket label used when an appointment's service type can't be resolved.
pub const UNKNOWN_SERVICE: &str = "Não informado";

const MONTHLY_BUCKETS: u32 = 6;
const UPCOMING_DAYS: i64 = 7;
const UPCOMING_LIMIT: u32 = 10;

// ============================================================================
// COUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBreakdown {
    pub scheduled: usize,
    pub done: usize,
    pub canceled: usize,
}

impl StatusBreakdown {
    pub fn add(&mut self, status: AppointmentStatus) {
        match status {
            AppointmentStatus::Scheduled => self.scheduled += 1,
            AppointmentStatus::Done => self.done += 1,
            AppointmentStatus::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.scheduled + self.done + self.canceled
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub scheduled: usize,
    pub done: usize,
    pub canceled: usize,
}

impl From<StatusBreakdown> for StatusCounts {
    fn from(b: StatusBreakdown) -> Self {
        Self {
            total: b.total(),
            scheduled: b.scheduled,
            done: b.done,
            canceled: b.canceled,
        }
    }
}

pub fn count_by_status(appointments: &[Appointment]) -> StatusCounts {
    let mut breakdown = StatusBreakdown::default();
    for a in appointments {
        breakdown.add(a.status);
    }
    breakdown.into()
}

// ============================================================================
// GROUPINGS
// ============================================================================

fn month_key(date: NaiveDate) -> String {
    format!("{}-{:02}", date.year(), date.month())
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// "YYYY-MM" buckets for the 6 months ending with `today`'s month.
///
/// All six keys are present even when empty. Appointments outside the window
/// are ignored.
pub fn by_month(appointments: &[Appointment], today: NaiveDate) -> BTreeMap<String, StatusBreakdown> {
    let current = first_of_month(today);
    let mut buckets: BTreeMap<String, StatusBreakdown> = (0..MONTHLY_BUCKETS)
        .filter_map(|i| current.checked_sub_months(Months::new(i)))
        .map(|month| (month_key(month), StatusBreakdown::default()))
        .collect();

    for a in appointments {
        if let Some(bucket) = buckets.get_mut(&month_key(a.date)) {
            bucket.add(a.status);
        }
    }
    buckets
}

/// Per calendar day, only days that have appointments.
pub fn by_day(appointments: &[Appointment]) -> BTreeMap<NaiveDate, StatusBreakdown> {
    let mut days: BTreeMap<NaiveDate, StatusBreakdown> = BTreeMap::new();
    for a in appointments {
        days.entry(a.date).or_default().add(a.status);
    }
    days
}

pub fn by_service_type(appointments: &[Appointment]) -> BTreeMap<String, StatusBreakdown> {
    let mut services: BTreeMap<String, StatusBreakdown> = BTreeMap::new();
    for a in appointments {
        let name = a
            .service_type_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());
        services.entry(name).or_default().add(a.status);
    }
    services
}

// ============================================================================
// MONTHLY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppointmentsByStatus {
    pub scheduled: Vec<Appointment>,
    pub done: Vec<Appointment>,
    pub canceled: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub period: Period,
    pub summary: StatusCounts,
    pub by_status: AppointmentsByStatus,
    pub by_service_type: BTreeMap<String, StatusBreakdown>,
    pub by_day: BTreeMap<NaiveDate, StatusBreakdown>,
}

/// Group `appointments` (already limited to one month) into the report shape.
pub fn build_monthly_report(year: i32, month: u32, appointments: Vec<Appointment>) -> MonthlyReport {
    let summary = count_by_status(&appointments);
    let by_service_type = by_service_type(&appointments);
    let by_day = by_day(&appointments);

    let mut by_status = AppointmentsByStatus::default();
    for a in appointments {
        match a.status {
            AppointmentStatus::Scheduled => by_status.scheduled.push(a),
            AppointmentStatus::Done => by_status.done.push(a),
            AppointmentStatus::Canceled => by_status.canceled.push(a),
        }
    }

    MonthlyReport {
        period: Period { year, month },
        summary,
        by_status,
        by_service_type,
        by_day,
    }
}

/// First and last day of a calendar month.
pub fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=12).contains(&month) {
        return Err(ScheduleError::validation("month", "must be between 1 and 12"));
    }
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ScheduleError::validation("year", format!("{} is out of range", year)))?;
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| ScheduleError::validation("year", format!("{} is out of range", year)))?;
    Ok((start, end))
}

pub fn monthly_report(conn: &Connection, year: i32, month: u32) -> Result<MonthlyReport> {
    let (start, end) = month_range(year, month)?;
    let appointments = db::get_appointments_between(conn, start, end)?;
    Ok(build_monthly_report(year, month, appointments))
}

// ============================================================================
// DASHBOARD
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub stats: StatusCounts,
    pub monthly_stats: BTreeMap<String, StatusBreakdown>,
    pub upcoming_appointments: Vec<Appointment>,
}

pub fn dashboard(conn: &Connection, today: NaiveDate) -> Result<Dashboard> {
    let all = db::get_all_appointments(conn)?;
    let upcoming = db::get_upcoming_scheduled(
        conn,
        today,
        today + Duration::days(UPCOMING_DAYS),
        UPCOMING_LIMIT,
    )?;

    Ok(Dashboard {
        stats: count_by_status(&all),
        monthly_stats: by_month(&all, today),
        upcoming_appointments: upcoming,
    })
}

pub fn status_stats(conn: &Connection) -> Result<StatusCounts> {
    let all = db::get_all_appointments(conn)?;
    Ok(count_by_status(&all))
}
