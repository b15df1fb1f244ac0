//! Configuration management for the compute economist.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `RATE_CARD_PATH` - Optional. YAML or JSON rate table. Defaults to the built-in table.
//! - `VOC_STOP_THRESHOLD` - Optional. Similarity at which reasoning stops. Defaults to `0.95`.
//! - `OUTPUT_TOKEN_RATIO` - Optional. Output/input ratio without a hint. Defaults to `0.2`.
//! - `SOFT_LIMIT_THRESHOLD` - Optional. Budget ratio that triggers warnings. Defaults to `0.8`.
//! - `ARBITRAGE_DIFFICULTY_THRESHOLD` - Optional. Difficulty below which downgrades are offered. Defaults to `0.5`.
//! - `MIN_CAPABILITY_TIER` - Optional. Capability floor for substitutes.
//! - `FAN_OUT_LATENCY` - Optional. `parallel` or `sequential`. Defaults to `parallel`.
//! - `CALIBRATION_MIN_SAMPLES` - Optional. Samples before a ratio is recommended. Defaults to `5`.
//! - `TRACE_CAPACITY` - Optional. Traces kept for reconciliation. Defaults to `10000`.
//! - `TRACE_TTL_HOURS` - Optional. Hours a trace is kept, `0` for no expiry. Defaults to `24`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::budget::{FanOutPolicy, RateTable};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read rate card {path}: {source}")]
    ReadRateCard {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rate card {path}: {message}")]
    ParseRateCard { path: PathBuf, message: String },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Rate table file; the built-in table is used when unset
    pub rate_card_path: Option<PathBuf>,

    pub voc_stop_threshold: f64,

    pub output_token_ratio: f64,

    pub soft_limit_threshold: f64,

    pub arbitrage_difficulty_threshold: f64,

    pub min_capability_tier: Option<u8>,

    /// How agent latency combines within a round
    pub fan_out: FanOutPolicy,

    pub calibration_min_samples: u64,

    /// Most traces held at once; the oldest is evicted first
    pub trace_capacity: usize,

    /// Trace lifetime in hours; 0 disables expiry
    pub trace_ttl_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            rate_card_path: None,
            voc_stop_threshold: 0.95,
            output_token_ratio: 0.2,
            soft_limit_threshold: 0.8,
            arbitrage_difficulty_threshold: 0.5,
            min_capability_tier: None,
            fan_out: FanOutPolicy::Parallel,
            calibration_min_samples: 5,
            trace_capacity: 10_000,
            trace_ttl_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a set variable does not parse
    /// or a ratio lies outside its range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "PORT")?.unwrap_or(defaults.port);
        let rate_card_path = lookup("RATE_CARD_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let voc_stop_threshold = unit_var(&lookup, "VOC_STOP_THRESHOLD")?.unwrap_or(defaults.voc_stop_threshold);
        let soft_limit_threshold =
            unit_var(&lookup, "SOFT_LIMIT_THRESHOLD")?.unwrap_or(defaults.soft_limit_threshold);
        let arbitrage_difficulty_threshold = unit_var(&lookup, "ARBITRAGE_DIFFICULTY_THRESHOLD")?
            .unwrap_or(defaults.arbitrage_difficulty_threshold);

        let output_token_ratio: f64 = parse_var(&lookup, "OUTPUT_TOKEN_RATIO")?.unwrap_or(defaults.output_token_ratio);
        if !output_token_ratio.is_finite() || output_token_ratio < 0.0 {
            return Err(ConfigError::InvalidValue(
                "OUTPUT_TOKEN_RATIO".to_string(),
                format!("must be a non-negative number, got {}", output_token_ratio),
            ));
        }

        let min_capability_tier = parse_var(&lookup, "MIN_CAPABILITY_TIER")?;
        let fan_out = parse_var(&lookup, "FAN_OUT_LATENCY")?.unwrap_or(defaults.fan_out);
        let calibration_min_samples =
            parse_var(&lookup, "CALIBRATION_MIN_SAMPLES")?.unwrap_or(defaults.calibration_min_samples);

        let trace_capacity: usize = parse_var(&lookup, "TRACE_CAPACITY")?.unwrap_or(defaults.trace_capacity);
        if trace_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "TRACE_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let trace_ttl_hours = parse_var(&lookup, "TRACE_TTL_HOURS")?.unwrap_or(defaults.trace_ttl_hours);

        Ok(Self {
            host,
            port,
            rate_card_path,
            voc_stop_threshold,
            output_token_ratio,
            soft_limit_threshold,
            arbitrage_difficulty_threshold,
            min_capability_tier,
            fan_out,
            calibration_min_samples,
            trace_capacity,
            trace_ttl_hours,
        })
    }

    /// The configured rate table, or the built-in one.
    pub fn load_rate_table(&self) -> Result<RateTable, ConfigError> {
        match &self.rate_card_path {
            Some(path) => load_rate_table(path),
            None => {
                tracing::warn!("RATE_CARD_PATH not set, using built-in rate table");
                Ok(RateTable::default())
            }
        }
    }
}

/// Read a rate table from a `.json` file, or YAML otherwise.
pub fn load_rate_table(path: &Path) -> Result<RateTable, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadRateCard {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        serde_json::from_str(&contents).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&contents).map_err(|e| e.to_string())
    };
    let table: RateTable = parsed.map_err(|message| ConfigError::ParseRateCard {
        path: path.to_path_buf(),
        message,
    })?;
    tracing::info!(path = %path.display(), models = table.len(), "Loaded rate table");
    Ok(table)
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(None),
    }
}

fn unit_var<F>(lookup: &F, key: &str) -> Result<Option<f64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: Option<f64> = parse_var(lookup, key)?;
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be between 0.0 and 1.0, got {}", v),
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.voc_stop_threshold, 0.95);
        assert_eq!(config.output_token_ratio, 0.2);
        assert_eq!(config.fan_out, FanOutPolicy::Parallel);
        assert_eq!(config.min_capability_tier, None);
        assert!(config.rate_card_path.is_none());
        assert_eq!(config.trace_capacity, 10_000);
        assert_eq!(config.trace_ttl_hours, 24);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("VOC_STOP_THRESHOLD", "0.9"),
            ("MIN_CAPABILITY_TIER", "2"),
            ("FAN_OUT_LATENCY", "sequential"),
            ("CALIBRATION_MIN_SAMPLES", "10"),
            ("RATE_CARD_PATH", "/etc/rates.yaml"),
            ("TRACE_CAPACITY", "500"),
            ("TRACE_TTL_HOURS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.voc_stop_threshold, 0.9);
        assert_eq!(config.min_capability_tier, Some(2));
        assert_eq!(config.fan_out, FanOutPolicy::Sequential);
        assert_eq!(config.calibration_min_samples, 10);
        assert_eq!(config.rate_card_path, Some(PathBuf::from("/etc/rates.yaml")));
        assert_eq!(config.trace_capacity, 500);
        assert_eq!(config.trace_ttl_hours, 0);
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("PORT", "not-a-port"),
            ("VOC_STOP_THRESHOLD", "1.5"),
            ("SOFT_LIMIT_THRESHOLD", "abc"),
            ("OUTPUT_TOKEN_RATIO", "-0.5"),
            ("FAN_OUT_LATENCY", "both"),
            ("MIN_CAPABILITY_TIER", "300"),
            ("TRACE_CAPACITY", "0"),
            ("TRACE_TTL_HOURS", "-1"),
        ] {
            let err = Config::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidValue(k, _) if k == key),
                "{} should be invalid, got {:?}",
                key,
                err
            );
        }
    }

    #[test]
    fn test_load_yaml_rate_table() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "models:\n  - id: house-model\n    input_cost_per_million: 1.0\n    output_cost_per_million: 2.0\n"
        )
        .unwrap();

        let config = Config {
            rate_card_path: Some(file.path().to_path_buf()),
            ..Config::default()
        };
        let table = config.load_rate_table().unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get("house-model").is_some());
    }

    #[test]
    fn test_load_json_rate_table() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"models": [{{"id": "m", "input_cost_per_million": 1.0, "output_cost_per_million": 1.0}}],
                "tools": [{{"id": "search", "cost_per_call": 0.5}}]}}"#
        )
        .unwrap();
        let table = load_rate_table(file.path()).unwrap();
        assert_eq!(table.tool("search").unwrap().cost_per_call, 0.5);
    }

    #[test]
    fn test_rate_table_errors() {
        let missing = load_rate_table(Path::new("/nonexistent/rates.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadRateCard { .. }));

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "models:\n  - id: bad\n    input_cost_per_million: -1.0\n    output_cost_per_million: 2.0\n"
        )
        .unwrap();
        let invalid = load_rate_table(file.path()).unwrap_err();
        assert!(matches!(invalid, ConfigError::ParseRateCard { .. }));
    }

    #[test]
    fn test_missing_path_uses_default_table() {
        let table = Config::default().load_rate_table().unwrap();
        assert_eq!(table, RateTable::default());
    }
}
