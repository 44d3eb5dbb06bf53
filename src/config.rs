use crate::catalog::{FilterSet, DEFAULT_CATALOG_URL};
use crate::category::{OrbitDirection, OrbitFileType};
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Everything one run needs: time window, area, what to fetch and where to put it.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RunConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub start_date: String,
    pub completion_date: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub fail_fast: bool,
    /// Area of interest as WKT
    #[serde(default)]
    pub aoi: Option<String>,
    /// Text file holding the area of interest as WKT
    #[serde(default)]
    pub aoi_file: Option<PathBuf>,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default)]
    pub orbit_files: Vec<OrbitFileType>,
    #[serde(default)]
    pub products: Option<ProductSelection>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ProductSelection {
    #[serde(default = "default_product_type")]
    pub product_type: String,
    #[serde(default)]
    pub sensor_mode: Option<String>,
    #[serde(default)]
    pub processing_level: Option<String>,
    pub tracks: Vec<Track>,
}

/// One pass geometry to fetch products for.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Track {
    pub direction: OrbitDirection,
    #[serde(default)]
    pub relative_orbit: Option<u32>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_platform() -> String {
    "S1A".to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_product_type() -> String {
    "SLC".to_string()
}

pub fn template_toml() -> toml::Table {
    toml::toml! {
        output_dir = "."

        start_date = "2025-12-21"

        completion_date = "2026-01-21"

        platform = "S1A"

        concurrency = 3

        fail_fast = false

        aoi = "POLYGON((10.95 45.95, 11.45 45.95, 11.45 46.35, 10.95 46.35, 10.95 45.95))"

        // Precise orbits only; add "RESORB" for the restituted ones
        orbit_files = ["POEORB"]

        [products]
        product_type = "SLC"
        sensor_mode = "IW"
        processing_level = "LEVEL1"
        tracks = [
            { direction = "ASCENDING", relative_orbit = 160 },
            { direction = "DESCENDING", relative_orbit = 167 }
        ]

        [retry]
        max_retries = 3
        initial_delay_ms = 1000
        max_delay_ms = 30000
        backoff_multiplier = 2.0
    }
}

impl RunConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self, ConfigError> {
        let config = toml::Value::Table(table.clone()).try_into()?;
        Ok(config)
    }

    pub fn template() -> Self {
        Self::from_template(&template_toml()).expect("Built-in template should always parse")
    }

    pub fn validate(self: &Self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let start = parse_date(&self.start_date).ok_or_else(|| {
            ConfigError::Invalid(format!("unrecognised start_date: {}", self.start_date))
        })?;
        let completion = parse_date(&self.completion_date).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unrecognised completion_date: {}",
                self.completion_date
            ))
        })?;
        if start > completion {
            return Err(ConfigError::Invalid(format!(
                "start_date {} is after completion_date {}",
                self.start_date, self.completion_date
            )));
        }

        if self.aoi.is_some() && self.aoi_file.is_some() {
            return Err(ConfigError::Invalid(
                "set either aoi or aoi_file, not both".to_string(),
            ));
        }

        let tracks = self.products.as_ref().map_or(0, |p| p.tracks.len());
        if self.orbit_files.is_empty() && tracks == 0 {
            return Err(ConfigError::Invalid(
                "nothing to download: no orbit_files and no product tracks".to_string(),
            ));
        }
        Ok(())
    }

    pub fn concurrency(self: &Self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.concurrency)
            .ok_or_else(|| ConfigError::Invalid("concurrency must be at least 1".to_string()))
    }

    /// The area of interest as WKT, read from `aoi_file` when one is configured.
    pub fn resolve_aoi(self: &Self) -> Result<Option<String>, ConfigError> {
        if let Some(path) = &self.aoi_file {
            let wkt = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let wkt = wkt.trim();
            if wkt.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} holds no geometry",
                    path.display()
                )));
            }
            return Ok(Some(wkt.to_string()));
        }
        Ok(self.aoi.clone())
    }

    /// Constraints shared by every group: platform and time window.
    pub fn base_filter(self: &Self) -> FilterSet {
        FilterSet {
            platform: Some(self.platform.clone()),
            start_date: Some(self.start_date.clone()),
            completion_date: Some(self.completion_date.clone()),
            ..Default::default()
        }
    }
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template() {
        let config = RunConfig::template();
        assert_eq!(config.start_date, "2025-12-21");
        assert_eq!(config.orbit_files, vec![OrbitFileType::Poeorb]);
        let products = config.products.as_ref().unwrap();
        assert_eq!(products.tracks.len(), 2);
        assert_eq!(products.tracks[1].direction, OrbitDirection::Descending);
        assert_eq!(products.tracks[1].relative_orbit, Some(167));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        let config = RunConfig::template();
        config.write(&path).unwrap();

        let read = RunConfig::read(&path).unwrap();
        assert_eq!(read, config);
    }

    #[test]
    fn test_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
            start_date = "2025-12-21"
            completion_date = "2026-01-21"
            orbit_files = ["RESORB"]
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.platform, "S1A");
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(!config.fail_fast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = RunConfig::template();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::template();
        config.start_date = "2026-02-01".to_string();
        assert!(config.validate().is_err());

        let mut config = RunConfig::template();
        config.completion_date = "next tuesday".to_string();
        assert!(config.validate().is_err());

        let mut config = RunConfig::template();
        config.aoi_file = Some(PathBuf::from("aoi.wkt"));
        assert!(config.validate().is_err());

        let mut config = RunConfig::template();
        config.orbit_files.clear();
        config.products = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rfc3339_dates() {
        let mut config = RunConfig::template();
        config.start_date = "2025-12-21T00:00:00Z".to_string();
        config.completion_date = "2026-01-21T23:59:59.999Z".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_aoi_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aoi.wkt");
        fs::write(&path, "POINT(11 46)\n").unwrap();

        let mut config = RunConfig::template();
        config.aoi = None;
        config.aoi_file = Some(path);
        assert_eq!(config.resolve_aoi().unwrap().as_deref(), Some("POINT(11 46)"));

        config.aoi_file = Some(dir.path().join("missing.wkt"));
        assert!(matches!(
            config.resolve_aoi(),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let err = RunConfig::read("/nonexistent/run.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
