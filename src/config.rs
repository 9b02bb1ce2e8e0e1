// ⚙️ Configuration - TOML file plus environment overrides
//
// Source order: CLINIC_CONFIG, else clinic.toml if present, else defaults.
// PORT, DATABASE_PATH and CORS_ALLOWED_ORIGINS are applied on top.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::Database;

pub const DEFAULT_LOG_FILTER: &str = "clinic_schedule=info,tower_http=info";
const DEFAULT_CONFIG_FILE: &str = "clinic.toml";

/// File to load: `CLINIC_CONFIG` wins, then `clinic.toml` when it exists.
fn config_path(explicit: Option<PathBuf>, default_exists: bool) -> Option<PathBuf> {
    explicit.or_else(|| default_exists.then(|| PathBuf::from(DEFAULT_CONFIG_FILE)))
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub clinic: ClinicConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory of static pages served as fallback
    pub static_dir: PathBuf,
    /// Empty = permissive CORS
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            static_dir: PathBuf::from("web"),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// How long a writer waits for the database lock before failing
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clinic.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicConfig {
    /// Service types inserted when the catalog is empty
    pub services: Vec<String>,
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            services: vec!["Consulta".to_string(), "Retorno".to_string()],
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Config file (if any) plus environment overrides.
    ///
    /// Prints which source was used; this runs before logging is set up.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("CLINIC_CONFIG").map(PathBuf::from);
        let default_exists = Path::new(DEFAULT_CONFIG_FILE).exists();
        let mut config = match config_path(explicit, default_exists) {
            Some(path) => {
                println!("⚙️  Loading config from: {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                println!("⚙️  No config file found, using defaults");
                Config::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT`, `DATABASE_PATH` and `CORS_ALLOWED_ORIGINS`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("PORT") {
            let port: u16 = port.trim().parse().with_context(|| format!("Invalid PORT '{}'", port))?;
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            self.server.cors_allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            bail!("Missing required field: database.path");
        }
        if self.database.busy_timeout_ms == 0 {
            bail!("Invalid configuration: database.busy_timeout_ms must be > 0");
        }
        if self.server.bind.trim().is_empty() {
            bail!("Missing required field: server.bind");
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    /// Open the store described by this config, creating the schema and
    /// seeding service types on first use.
    pub fn open_database(&self) -> Result<Database> {
        let db = Database::open(&self.database.path, self.busy_timeout())
            .with_context(|| format!("Failed to open database {}", self.database.path.display()))?;
        let conn = db.connect()?;
        let seeded = crate::db::seed_service_types(&conn, &self.clinic.services)?;
        if seeded > 0 {
            tracing::info!(seeded, "service types seeded");
        }
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.database.path, PathBuf::from("clinic.db"));
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert!(config.server.cors_allowed_origins.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_str(
            r#"
            [database]
            path = "/var/lib/clinic/clinic.db"

            [clinic]
            services = ["Avaliação"]
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/clinic/clinic.db"));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.clinic.services, vec!["Avaliação".to_string()]);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_config_path_precedence() {
        let explicit = Some(PathBuf::from("/etc/clinic/clinic.toml"));
        assert_eq!(config_path(explicit.clone(), true), explicit);
        assert_eq!(config_path(None, true), Some(PathBuf::from("clinic.toml")));
        assert_eq!(config_path(None, false), None);
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        assert!(Config::from_str("[database]\nbusy_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("DATABASE_PATH", "/tmp/x.db"),
            ("CORS_ALLOWED_ORIGINS", "http://localhost:3000, http://127.0.0.1:3000,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.server.cors_allowed_origins.len(), 2);

        assert!(config.apply_env(|k| (k == "PORT").then(|| "abc".to_string())).is_err());
    }

    #[test]
    fn test_open_database_seeds_services() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("clinic.db");

        let db = config.open_database().unwrap();
        let conn = db.connect().unwrap();
        let services = crate::db::list_active_service_types(&conn).unwrap();
        assert_eq!(services.len(), 2);

        // second open does not duplicate
        config.open_database().unwrap();
        assert_eq!(crate::db::list_active_service_types(&conn).unwrap().len(), 2);
    }
}
