use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("tolerance must be a finite, non-negative number (got {0})")]
    InvalidTolerance(f32),
}

/// Daemon configuration: optional TOML file, then `FACEVAULT_*` overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Socket address for the HTTP API.
    pub bind: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a recognized or duplicate face.
    pub tolerance: f32,
    /// Photos in this directory are registered under their file stem at startup.
    pub reference_dir: Option<PathBuf>,
    /// Upper bound on request body size.
    pub max_upload_bytes: usize,
    /// Uploads are downscaled so their longest side fits this.
    pub max_image_dim: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            db_path: default_data_dir().join("faces.db"),
            model_dir: facevault_core::default_model_dir(),
            tolerance: facevault_core::DEFAULT_TOLERANCE,
            reference_dir: None,
            max_upload_bytes: 10 * 1024 * 1024,
            max_image_dim: 1600,
        }
    }
}

impl Config {
    /// Load from `$FACEVAULT_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEVAULT_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; absent keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEVAULT_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("FACEVAULT_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEVAULT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEVAULT_REFERENCE_DIR") {
            self.reference_dir = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(v) = parse_var(&lookup, "FACEVAULT_TOLERANCE")? {
            self.tolerance = v;
        }
        if let Some(v) = parse_var(&lookup, "FACEVAULT_MAX_UPLOAD_BYTES")? {
            self.max_upload_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, "FACEVAULT_MAX_IMAGE_DIM")? {
            self.max_image_dim = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facevault")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tolerance, 0.5);
        assert_eq!(config.bind, "0.0.0.0:8000");
        assert!(config.db_path.ends_with("facevault/faces.db"));
        assert!(config.reference_dir.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("FACEVAULT_TOLERANCE", "0.42"),
                ("FACEVAULT_BIND", "127.0.0.1:9000"),
                ("FACEVAULT_REFERENCE_DIR", "/srv/photos"),
                ("FACEVAULT_MAX_IMAGE_DIM", " 800 "),
            ]))
            .unwrap();
        assert!((config.tolerance - 0.42).abs() < 1e-6);
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.reference_dir, Some(PathBuf::from("/srv/photos")));
        assert_eq!(config.max_image_dim, 800);
    }

    #[test]
    fn test_unparseable_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("FACEVAULT_MAX_UPLOAD_BYTES", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "FACEVAULT_MAX_UPLOAD_BYTES", .. }
        ));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let mut config = Config::default();
        config.apply_env(env(&[("FACEVAULT_TOLERANCE", "-1")])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTolerance(_))));
    }

    #[test]
    fn test_from_file_partial() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("facevault.toml");
        std::fs::write(&path, "tolerance = 0.6\nreference_dir = \"/data/ref\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert!((config.tolerance - 0.6).abs() < 1e-6);
        assert_eq!(config.reference_dir, Some(PathBuf::from("/data/ref")));
        assert_eq!(config.max_image_dim, 1600);
    }

    #[test]
    fn test_from_file_unknown_key() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("facevault.toml");
        std::fs::write(&path, "tolerence = 0.6\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }
}
