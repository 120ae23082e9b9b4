//! Observability configuration parsing from environment variables.
//!
//! This module handles log output format and the per-cycle metrics report.

use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" | "plain" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid LOG_FORMAT: {}. Must be 'pretty' or 'json'", s),
        }
    }
}

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub log_format: LogFormat,
    /// Emit a `METRICS_JSON:` line after every scheduled cycle
    pub metrics_report_enabled: bool,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_report_enabled: true,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            log_format: env::var("LOG_FORMAT")
                .ok()
                .and_then(|v| LogFormat::from_str(&v).ok())
                .unwrap_or(LogFormat::Pretty),
            metrics_report_enabled: env::var("METRICS_REPORT_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_config_defaults() {
        let config = ObservabilityEnvConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.metrics_report_enabled);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
