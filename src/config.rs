//! Worker configuration loaded from environment variables.
//!
//! | Variable                  | Default                  |
//! |---------------------------|--------------------------|
//! | `AUTOEXPORT`              | `false`                  |
//! | `EXPORT_FILESYSTEM`       | `false`                  |
//! | `PDF_EXPORT_DIR`          | `./quizattemptexport`    |
//! | `PDF_GENERATION_TIMEOUT`  | `120` (seconds, <1 = off)|
//! | `MATHJAX_ENABLE`          | `false`                  |
//! | `MATHJAX_DELAY`           | `10` (seconds)           |
//! | `WKHTMLTOPDF_BINARY`      | `wkhtmltopdf`            |
//! | `EXPORT_TEMP_DIR`         | OS temp dir              |
//! | `BLOB_ROOT`               | `./filedir`              |
//! | `ATTEMPT_DATA_DIR`        | `./attempts`             |
//! | `STACK_PLOT_DIR`          | `./stack/plots`          |
//! | `SITE_URL`                | unset                    |
//! | `REDIS_URL`               | `redis://127.0.0.1/`     |
//! | `SCHEDULER_INTERVAL_SECS` | `60`                     |
//! | `STALE_PROCESSING_SECS`   | `3600` (0 = off)         |

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{ExportError, Result};

/// Delay applied when MathJax is enabled but no usable delay is configured.
const DEFAULT_MATHJAX_DELAY_SECS: i64 = 10;
const DEFAULT_TIMEOUT_SECS: i64 = 120;

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub autoexport: bool,
    pub export_filesystem: bool,
    pub pdf_export_dir: Option<PathBuf>,
    /// Raw timeout setting in seconds; values below 1 disable the timeout.
    pub pdf_generation_timeout: i64,
    pub mathjax_enable: bool,
    /// Normalized MathJax settling delay in seconds (always >= 1).
    pub mathjax_delay_secs: u64,
    pub wkhtmltopdf_binary: PathBuf,
    pub temp_dir: PathBuf,
    pub blob_root: PathBuf,
    pub attempt_data_dir: PathBuf,
    pub stack_plot_dir: PathBuf,
    pub site_url: Option<Url>,
    pub redis_url: String,
    pub scheduler_interval: Duration,
    pub stale_processing_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            autoexport: false,
            export_filesystem: false,
            pdf_export_dir: Some(PathBuf::from("./quizattemptexport")),
            pdf_generation_timeout: DEFAULT_TIMEOUT_SECS,
            mathjax_enable: false,
            mathjax_delay_secs: DEFAULT_MATHJAX_DELAY_SECS as u64,
            wkhtmltopdf_binary: PathBuf::from("wkhtmltopdf"),
            temp_dir: std::env::temp_dir(),
            blob_root: PathBuf::from("./filedir"),
            attempt_data_dir: PathBuf::from("./attempts"),
            stack_plot_dir: PathBuf::from("./stack/plots"),
            site_url: None,
            redis_url: "redis://127.0.0.1/".to_string(),
            scheduler_interval: Duration::from_secs(60),
            stale_processing_secs: 3600,
        }
    }
}

impl ExportConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("AUTOEXPORT") {
            config.autoexport = parse_bool("AUTOEXPORT", &value)?;
        }
        if let Some(value) = get("EXPORT_FILESYSTEM") {
            config.export_filesystem = parse_bool("EXPORT_FILESYSTEM", &value)?;
        }
        if let Some(value) = lookup("PDF_EXPORT_DIR") {
            let value = value.trim().to_string();
            config.pdf_export_dir = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = get("PDF_GENERATION_TIMEOUT") {
            config.pdf_generation_timeout = parse_int("PDF_GENERATION_TIMEOUT", &value)?;
        }
        if let Some(value) = get("MATHJAX_ENABLE") {
            config.mathjax_enable = parse_bool("MATHJAX_ENABLE", &value)?;
        }
        if let Some(value) = get("MATHJAX_DELAY") {
            // Anything unusable falls back to the default instead of failing.
            let delay = value.trim().parse::<i64>().unwrap_or(DEFAULT_MATHJAX_DELAY_SECS);
            config.mathjax_delay_secs = if delay < 1 {
                DEFAULT_MATHJAX_DELAY_SECS as u64
            } else {
                delay as u64
            };
        }
        if let Some(value) = get("WKHTMLTOPDF_BINARY") {
            config.wkhtmltopdf_binary = PathBuf::from(value);
        }
        if let Some(value) = get("EXPORT_TEMP_DIR") {
            config.temp_dir = PathBuf::from(value);
        }
        if let Some(value) = get("BLOB_ROOT") {
            config.blob_root = PathBuf::from(value);
        }
        if let Some(value) = get("ATTEMPT_DATA_DIR") {
            config.attempt_data_dir = PathBuf::from(value);
        }
        if let Some(value) = get("STACK_PLOT_DIR") {
            config.stack_plot_dir = PathBuf::from(value);
        }
        if let Some(value) = get("SITE_URL") {
            let url = Url::parse(value.trim())
                .map_err(|err| ExportError::config("SITE_URL", err.to_string()))?;
            config.site_url = Some(url);
        }
        if let Some(value) = get("REDIS_URL") {
            config.redis_url = value;
        }
        if let Some(value) = get("SCHEDULER_INTERVAL_SECS") {
            let secs = parse_int("SCHEDULER_INTERVAL_SECS", &value)?;
            if secs < 1 {
                return Err(ExportError::config(
                    "SCHEDULER_INTERVAL_SECS",
                    "must be at least 1",
                ));
            }
            config.scheduler_interval = Duration::from_secs(secs as u64);
        }
        if let Some(value) = get("STALE_PROCESSING_SECS") {
            let secs = parse_int("STALE_PROCESSING_SECS", &value)?;
            config.stale_processing_secs = secs.max(0) as u64;
        }

        Ok(config)
    }

    /// Converter timeout, or `None` when disabled.
    pub fn conversion_timeout(&self) -> Option<Duration> {
        (self.pdf_generation_timeout >= 1)
            .then(|| Duration::from_secs(self.pdf_generation_timeout as u64))
    }

    /// Per-document JavaScript settling delay, only when MathJax is enabled.
    pub fn javascript_delay(&self) -> Option<Duration> {
        self.mathjax_enable
            .then(|| Duration::from_secs(self.mathjax_delay_secs))
    }

    /// Age after which a Processing job is considered abandoned.
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_processing_secs > 0).then(|| Duration::from_secs(self.stale_processing_secs))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ExportError::config(
            key,
            format!("expected a boolean, got `{}`", other),
        )),
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ExportError::config(key, format!("expected an integer, got `{}`", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ExportConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExportConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(!config.autoexport);
        assert_eq!(config.conversion_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.javascript_delay(), None);
        assert_eq!(config.stale_after(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_timeout_below_one_disables() {
        let config = config_from(&[("PDF_GENERATION_TIMEOUT", "0")]).unwrap();
        assert_eq!(config.conversion_timeout(), None);

        let config = config_from(&[("PDF_GENERATION_TIMEOUT", "-5")]).unwrap();
        assert_eq!(config.conversion_timeout(), None);
    }

    #[test]
    fn test_mathjax_delay_normalization() {
        let config = config_from(&[("MATHJAX_ENABLE", "1"), ("MATHJAX_DELAY", "0")]).unwrap();
        assert_eq!(config.javascript_delay(), Some(Duration::from_secs(10)));

        let config = config_from(&[("MATHJAX_ENABLE", "true"), ("MATHJAX_DELAY", "abc")]).unwrap();
        assert_eq!(config.javascript_delay(), Some(Duration::from_secs(10)));

        let config = config_from(&[("MATHJAX_ENABLE", "yes"), ("MATHJAX_DELAY", "2")]).unwrap();
        assert_eq!(config.javascript_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = config_from(&[("AUTOEXPORT", "maybe")]).unwrap_err();
        assert!(matches!(err, ExportError::Config { ref setting, .. } if setting == "AUTOEXPORT"));

        let err = config_from(&[("SCHEDULER_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ExportError::Config { .. }));

        assert!(config_from(&[("SITE_URL", "not a url")]).is_err());
    }

    #[test]
    fn test_empty_export_dir_is_unset() {
        let config = config_from(&[("PDF_EXPORT_DIR", "  ")]).unwrap();
        assert!(config.pdf_export_dir.is_none());
    }
}
