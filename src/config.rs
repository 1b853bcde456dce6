use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::UtcOffset;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: PathBuf,
    /// write logs to a daily rotated file in this directory instead of stdout
    pub log_dir: Option<PathBuf>,
    /// advisory pass mark for chapter tests, in percent
    pub pass_threshold: u8,
    /// offset used to bucket study history into calendar days
    pub utc_offset_hours: i8,
    pub session_expiry_days: i64,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database: PathBuf::from("database/study.db"),
            log_dir: None,
            pass_threshold: 70,
            utc_offset_hours: 9,
            session_expiry_days: 5,
            tls: None,
        }
    }
}

impl Config {
    /// Load from a toml file (defaults when `path` is `None`), then apply
    /// `STUDY_*` environment overrides, `.env` included.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                toml::from_str::<Config>(&content)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => Config::default(),
        };
        let _ = dotenvy::dotenv();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = dotenvy::var("STUDY_HOST") {
            self.host = host;
        }
        if let Ok(port) = dotenvy::var("STUDY_PORT") {
            self.port = port.parse().context("STUDY_PORT")?;
        }
        if let Ok(database) = dotenvy::var("STUDY_DATABASE") {
            self.database = PathBuf::from(database);
        }
        if let Ok(log_dir) = dotenvy::var("STUDY_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(log_dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pass_threshold > 100 {
            anyhow::bail!("pass_threshold must be at most 100, got {}", self.pass_threshold);
        }
        if self.session_expiry_days <= 0 {
            anyhow::bail!("session_expiry_days must be positive");
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> anyhow::Result<UtcOffset> {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0)
            .map_err(|e| anyhow::anyhow!("invalid utc_offset_hours {}: {}", self.utc_offset_hours, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 9000\npass_threshold = 80\n\n[tls]\ncert = \"cert.pem\"\nkey = \"key.pem\"").unwrap();
        let config: Config = toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.pass_threshold, 80);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.utc_offset_hours, 9);
        assert_eq!(config.tls.unwrap().cert, PathBuf::from("cert.pem"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = Config {
            pass_threshold: 120,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn offset_from_hours() {
        let config = Config::default();
        assert_eq!(config.utc_offset().unwrap().whole_hours(), 9);
    }
}
