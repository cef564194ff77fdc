//! Probe configuration
//!
//! The configuration file is a YAML or JSON document (chosen by extension)
//! flattened into dot-delimited keys
//! (`general.iface`, `denm.fpSubCauseCode`, ...). Typed [`Settings`] are
//! derived from it once at start-up and never change afterwards.

use crate::classifier::StationFilter;
use crate::error::ConfigError;
use crate::freshness::ReadPolicy;
use crate::types::{flatten_fields, StationId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./app.yaml";
/// Looked up in order when no path is given
pub const DEFAULT_CONFIG_CANDIDATES: [&str; 3] = ["./app.yaml", "./app.yml", "./app.json"];
pub const CONFIG_PATH_ENV: &str = "V2X_PROBE_CONFIG";

/// Flattened configuration document
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, Value>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(text)?;
        Ok(Self::from_document(&document))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(text)?;
        Ok(Self::from_document(&document))
    }

    fn from_document(document: &Value) -> Self {
        Self {
            entries: flatten_fields(document),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn get_str(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a string, found {}", other),
            }),
        }
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a non-negative integer, found {}", value),
            }),
        }
    }

    fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a number, found {}", value),
            }),
        }
    }

    fn get_station(&self, key: &str, default: StationId) -> Result<StationId, ConfigError> {
        match self.get_u64(key)? {
            None => Ok(default),
            Some(id) => StationId::try_from(id).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("station id {} out of range", id),
            }),
        }
    }
}

/// Attack burst parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AttackSettings {
    /// GeoNetworking source address stamped on forged frames
    pub gn_address: String,
    pub burst_count: u32,
    /// Upper bound of the uniform inter-send delay
    pub max_delay: Duration,
    /// Position spoof offset in metres
    pub offset_m: f64,
}

impl Default for AttackSettings {
    fn default() -> Self {
        Self {
            gn_address: "CA:6F:47:51:47:8B".to_string(),
            burst_count: 20,
            max_delay: Duration::from_millis(1000),
            offset_m: 65.0,
        }
    }
}

/// Typed settings derived from a [`Config`]
#[derive(Debug, Clone)]
pub struct Settings {
    pub iface: String,
    pub bus_address: String,
    pub http_bind: String,
    /// Dashboard asset directory, empty string disables it
    pub static_dir: Option<PathBuf>,
    pub station_filter: StationFilter,
    /// Dot path reported by `/rsu`
    pub sub_cause_path: String,
    pub cam_schema: Option<PathBuf>,
    pub denm_schema: Option<PathBuf>,
    pub attack: AttackSettings,
    pub read_policy: ReadPolicy,
    pub restart_delay: Duration,
    pub log_level: String,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let iface = config
            .get_str("general.iface")?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey("general.iface".to_string()))?;

        let defaults = StationFilter::default();
        let station_filter = StationFilter::new(
            config.get_station("cam.stationID", defaults.cam_station)?,
            config.get_station("denm.stationID", defaults.denm_station)?,
        );

        let attack_defaults = AttackSettings::default();
        let burst_count = match config.get_u64("attack.burst_count")? {
            None => attack_defaults.burst_count,
            Some(n) => u32::try_from(n).map_err(|_| ConfigError::InvalidValue {
                key: "attack.burst_count".to_string(),
                reason: format!("{} is too large", n),
            })?,
        };
        let attack = AttackSettings {
            gn_address: config
                .get_str("attack.gn_address")?
                .unwrap_or(attack_defaults.gn_address),
            burst_count,
            max_delay: config
                .get_u64("attack.max_delay_ms")?
                .map(Duration::from_millis)
                .unwrap_or(attack_defaults.max_delay),
            offset_m: config
                .get_f64("attack.offset_m")?
                .unwrap_or(attack_defaults.offset_m),
        };

        let settings = Self {
            iface,
            bus_address: config
                .get_str("general.bus_address")?
                .unwrap_or_else(|| "127.0.0.1:9100".to_string()),
            http_bind: config
                .get_str("http.bind")?
                .unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            static_dir: match config.get_str("http.static_dir")? {
                None => Some(PathBuf::from("./static")),
                Some(dir) if dir.trim().is_empty() => None,
                Some(dir) => Some(PathBuf::from(dir)),
            },
            station_filter,
            sub_cause_path: config
                .get_str("denm.fpSubCauseCode")?
                .unwrap_or_else(|| "situation.eventType.subCauseCode".to_string()),
            cam_schema: config.get_str("asn.cpath")?.map(PathBuf::from),
            denm_schema: config.get_str("asn.dpath")?.map(PathBuf::from),
            attack,
            read_policy: ReadPolicy::from_millis(config.get_u64("obu.timeout_ms")?.unwrap_or(0)),
            restart_delay: Duration::from_millis(
                config.get_u64("capture.restart_delay_ms")?.unwrap_or(50),
            ),
            log_level: config
                .get_str("log.level")?
                .unwrap_or_else(|| "info".to_string()),
        };
        settings.check_schemas()?;
        Ok(settings)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_config(&Config::load(path)?)
    }

    /// Configured schema files must exist even though the JSON codec ignores them
    fn check_schemas(&self) -> Result<(), ConfigError> {
        for path in [&self.cam_schema, &self.denm_schema].into_iter().flatten() {
            if !path.exists() {
                return Err(ConfigError::SchemaNotFound(path.clone()));
            }
        }
        Ok(())
    }
}

/// Config path from the first CLI argument, then the environment, then the
/// first default candidate that exists
pub fn resolve_config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .map(PathBuf::from)
        .or_else(|| {
            DEFAULT_CONFIG_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
