// Clinic Schedule - Core Library
// Availability and reservation engine used by the CLI, the API server, and tests

pub mod error;
pub mod slots;          // Slot catalog: bookable times and schedulable dates
pub mod models;
pub mod db;             // SQLite store, schema, audit events
pub mod blocks;         // Day and slot blocks
pub mod availability;
pub mod reservation;    // Atomic reserve / reopen / status changes
pub mod reports;
pub mod config;

#[cfg(feature = "server")]
pub mod api;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use error::{ConflictReason, Result, ScheduleError};
pub use models::{Appointment, AppointmentStatus, DayBlock, NewAppointment, ServiceType, TimeBlock};
pub use db::{
    Database, Event, AppointmentFilter, AppointmentPage,
    setup_database, get_appointment, list_appointments, insert_event, get_events_for_entity,
};
pub use slots::{catalog, is_schedulable_date, slots_of};
pub use availability::{get_availability, free_slots, SlotAvailability, SlotStatus};
pub use reservation::{reserve, reopen, set_status};
pub use reports::{monthly_report, dashboard, MonthlyReport, Dashboard, StatusCounts};
pub use config::Config;
