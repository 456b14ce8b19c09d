use crate::error::AppError;
use crate::format::SUPPORTED_SAMPLE_RATES;
use serde::Deserialize;
use std::path::Path;

/// Which sample source the runtime drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Default input device via the system audio backend.
    Cpal,
    /// Synthetic sine generator, for running without hardware.
    Tone,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub device_name: String,
    pub sample_rate: u32,
    pub http_port: u16,
    pub max_clients: usize,
    pub source: SourceKind,
    pub log_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: "wavecast".to_string(),
            sample_rate: 48_000,
            http_port: 8080,
            max_clients: 3,
            source: SourceKind::Cpal,
            log_dir: "logs".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        let cfg: AppConfig =
            toml::from_str(&raw).map_err(|e| AppError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(AppError::Config(format!(
                "sample_rate must be one of {:?}, got {}",
                SUPPORTED_SAMPLE_RATES, self.sample_rate
            )));
        }
        if self.max_clients == 0 || self.max_clients > 8 {
            return Err(AppError::Config(format!(
                "max_clients must be 1..=8, got {}",
                self.max_clients
            )));
        }
        if self.device_name.is_empty() {
            return Err(AppError::Config("device_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sample_rate, 48_000);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.max_clients, 3);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: AppConfig = toml::from_str("sample_rate = 96000\nhttp_port = 9000").unwrap();
        assert_eq!(cfg.sample_rate, 96_000);
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.max_clients, 3);
    }

    #[test]
    fn rejects_bad_rate() {
        let cfg = AppConfig {
            sample_rate: 12_345,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_source_kind() {
        let cfg: AppConfig = toml::from_str("source = \"tone\"").unwrap();
        assert_eq!(cfg.source, SourceKind::Tone);
    }
}
