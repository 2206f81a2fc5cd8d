use std::path::PathBuf;
use std::time::Duration;

use quicksync_core::error::CoreError;
use quicksync_core::profile::ProfileRegistry;
use quicksync_pipeline::PipelineConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Without a
/// `DATABASE_URL` the server runs on in-memory stores.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for closing the database pool after shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Largest accepted request body, uploads included (default: 20 MiB).
    pub max_upload_bytes: usize,
    /// How long an execute waits for the tenant's lock (default: `30`).
    pub execute_lock_timeout_secs: u64,
    /// Replacement for the embedded mapping profiles.
    pub mapping_profiles_path: Option<PathBuf>,
    pub database_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `HOST`                      | `0.0.0.0`               |
    /// | `PORT`                      | `3000`                  |
    /// | `CORS_ORIGINS`              | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                    |
    /// | `MAX_UPLOAD_BYTES`          | `20971520`              |
    /// | `EXECUTE_LOCK_TIMEOUT_SECS` | `30`                    |
    /// | `MAPPING_PROFILES_PATH`     | unset (embedded)        |
    /// | `DATABASE_URL`              | unset (in-memory)       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = parse_origins(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".into()),
        );

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (20 * 1024 * 1024).to_string())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let execute_lock_timeout_secs: u64 = std::env::var("EXECUTE_LOCK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("EXECUTE_LOCK_TIMEOUT_SECS must be a valid u64");

        let mapping_profiles_path = non_empty_var("MAPPING_PROFILES_PATH").map(PathBuf::from);
        let database_url = non_empty_var("DATABASE_URL");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            max_upload_bytes,
            execute_lock_timeout_secs,
            mapping_profiles_path,
            database_url,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            lock_timeout: Duration::from_secs(self.execute_lock_timeout_secs),
        }
    }

    /// The profiles from `mapping_profiles_path`, or the embedded set.
    pub fn load_profiles(&self) -> Result<ProfileRegistry, CoreError> {
        match &self.mapping_profiles_path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::Validation(format!(
                        "cannot read mapping profiles from {}: {e}",
                        path.display()
                    ))
                })?;
                ProfileRegistry::from_json(&json)
            }
            None => Ok(ProfileRegistry::builtin()),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: vec![],
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            max_upload_bytes: 1024,
            execute_lock_timeout_secs: 7,
            mapping_profiles_path: None,
            database_url: None,
        }
    }

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            parse_origins(" http://a.test , ,http://b.test,"),
            vec!["http://a.test", "http://b.test"]
        );
    }

    #[test]
    fn pipeline_config_uses_lock_timeout() {
        assert_eq!(config().pipeline_config().lock_timeout, Duration::from_secs(7));
    }

    #[test]
    fn embedded_profiles_without_path() {
        let profiles = config().load_profiles().unwrap();
        assert!(profiles.get("marketman").is_ok());
    }

    #[test]
    fn unreadable_profiles_path_is_rejected() {
        let mut config = config();
        config.mapping_profiles_path = Some(PathBuf::from("/nonexistent/quicksync/profiles.json"));
        assert_matches!(config.load_profiles(), Err(CoreError::Validation(_)));
    }
}
