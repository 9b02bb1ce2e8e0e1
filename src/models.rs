// 🩺 Domain records - appointments, blocks, service types
//
// Everything here is a plain value read from (or about to be written to) the
// store. Nothing is cached between requests.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::slots::hhmm;

pub const PATIENT_ID_DIGITS: usize = 11;
pub const MAX_NAME_LEN: usize = 255;
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_REASON_LEN: usize = 255;

// ============================================================================
// APPOINTMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Holds the slot
    Scheduled,
    Done,
    Canceled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 3] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Done,
        AppointmentStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Done => "done",
            AppointmentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text.trim() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "done" => Ok(AppointmentStatus::Done),
            "canceled" => Ok(AppointmentStatus::Canceled),
            other => Err(ScheduleError::validation(
                "status",
                format!("'{}' is not one of scheduled, done, canceled", other),
            )),
        }
    }

    /// Only scheduled appointments count against slot uniqueness.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// APPOINTMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub name: String,
    /// Normalized: exactly 11 digits
    pub patient_id: String,
    pub birth_date: NaiveDate,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub service_type_id: i64,
    /// Joined from service_types for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type_name: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

/// Reservation input, already parsed into typed values.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub name: String,
    /// Raw identifier; punctuation is stripped during validation
    pub patient_id: String,
    pub birth_date: NaiveDate,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub service_type_id: i64,
}

// ============================================================================
// BLOCKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBlock {
    pub id: i64,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: i64,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SERVICE TYPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceType {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

// ============================================================================
// FIELD NORMALIZATION
// ============================================================================

/// Strip punctuation and require exactly 11 digits.
///
/// "123.456.789-09" → "12345678909"
pub fn normalize_patient_id(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let has_other = raw
        .chars()
        .any(|c| c.is_alphanumeric() && !c.is_ascii_digit());

    if has_other || digits.len() != PATIENT_ID_DIGITS {
        return Err(ScheduleError::validation(
            "patient_id",
            format!("must contain exactly {} digits", PATIENT_ID_DIGITS),
        ));
    }
    Ok(digits)
}

/// Trimmed patient name, 2-255 characters.
pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(ScheduleError::validation(
            "name",
            format!("must have between {} and {} characters", MIN_NAME_LEN, MAX_NAME_LEN),
        ));
    }
    Ok(name.to_string())
}

/// Trimmed optional reason; blank becomes `None`.
pub fn normalize_reason(raw: Option<&str>) -> Result<Option<String>> {
    let Some(reason) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ScheduleError::validation(
            "reason",
            format!("must have at most {} characters", MAX_REASON_LEN),
        ));
    }
    Ok(Some(reason.to_string()))
}
