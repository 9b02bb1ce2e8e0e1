use anyhow::{bail, Context, Result};
use chrono::Local;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use clinic_schedule::db::{get_all_appointments, insert_service_type, list_active_service_types};
use clinic_schedule::slots::{format_date, format_time, parse_date};
use clinic_schedule::availability::count_free;
use clinic_schedule::{get_availability, Config, SlotStatus};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&config),
        Some("add-service") => match args.get(2) {
            Some(name) => run_add_service(&config, name),
            None => bail!("usage: clinic-schedule add-service <name>"),
        },
        Some("availability") => match args.get(2) {
            Some(date) => run_availability(&config, date),
            None => bail!("usage: clinic-schedule availability <YYYY-MM-DD>"),
        },
        Some("export") => match args.get(2) {
            Some(out) => run_export(&config, Path::new(out)),
            None => bail!("usage: clinic-schedule export <out.csv>"),
        },
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("🏥 Clinic Schedule");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Commands:");
    println!("  init                      create the database and seed service types");
    println!("  add-service <name>        add an active service type");
    println!("  availability <YYYY-MM-DD> show slot status for a day");
    println!("  export <out.csv>          write every appointment to CSV");
}

fn run_init(config: &Config) -> Result<()> {
    println!("🔧 Setting up database...");
    let db = config.open_database()?;
    println!("✓ Database initialized with WAL mode: {:?}", db.path());

    let conn = db.connect()?;
    let services = list_active_service_types(&conn)?;
    println!("✓ {} active service types", services.len());
    for service in services {
        println!("   {:>3}  {}", service.id, service.name);
    }
    Ok(())
}

fn run_add_service(config: &Config, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("service name must not be empty");
    }
    let db = config.open_database()?;
    let conn = db.connect()?;
    let service = insert_service_type(&conn, name)
        .with_context(|| format!("Failed to add service '{}'", name))?;
    println!("✓ Added service {} ({})", service.name, service.id);
    Ok(())
}

fn run_availability(config: &Config, date: &str) -> Result<()> {
    let date = parse_date("date", date)?;
    let today = Local::now().date_naive();
    let db = config.open_database()?;
    let mut conn = db.connect()?;

    let slots = get_availability(&mut conn, date, today)?;
    println!("📅 Availability for {}", format_date(date));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if slots.is_empty() {
        println!("No slots: weekend or past date");
        return Ok(());
    }
    for slot in &slots {
        let mark = match slot.status {
            SlotStatus::Free => "✓ free",
            SlotStatus::Reserved => "● reserved",
            SlotStatus::Blocked => "✗ blocked",
        };
        println!("  {}  {}", format_time(slot.time), mark);
    }

    let free = count_free(&slots);
    println!("\n{} of {} slots free", free, slots.len());
    Ok(())
}

fn run_export(config: &Config, out: &Path) -> Result<()> {
    let db = config.open_database()?;
    let conn = db.connect()?;

    println!("💾 Exporting appointments...");
    let appointments = get_all_appointments(&conn)?;

    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    writer.write_record([
        "id", "date", "time", "name", "patient_id", "birth_date", "service", "status", "created_at",
    ])?;
    for a in &appointments {
        writer.write_record([
            a.id.to_string(),
            format_date(a.date),
            format_time(a.time),
            a.name.clone(),
            a.patient_id.clone(),
            format_date(a.birth_date),
            a.service_type_name.clone().unwrap_or_default(),
            a.status.to_string(),
            a.created_at.to_rfc3339(),
        ])?;
    }
    writer.flush()?;

    println!("✓ Wrote {} appointments to {}", appointments.len(), out.display());
    Ok(())
}
