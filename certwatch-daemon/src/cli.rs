//! CLI argument definitions for certwatch-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use certwatch_core::error::ConfigError;
use certwatch_core::{CertwatchConfig, CertwatchError};

/// certwatch storage lifecycle observer.
///
/// Watches claims, pods and volume attachments for one test case,
/// persists the observed timeline and prints the derived metrics.
#[derive(Parser, Debug)]
#[command(name = "certwatch-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to certwatch.toml configuration file.
    #[arg(short, long, default_value = "/etc/certwatch/certwatch.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without observing.
    #[arg(long)]
    pub validate: bool,

    /// Run name grouping several test cases. Generated when omitted.
    #[arg(long)]
    pub run_name: Option<String>,

    /// Test case name recorded in the store.
    #[arg(long, default_value = "Observation")]
    pub test_case: String,

    /// Stop observing after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Keep events in memory only (overrides `[store] backend`).
    #[arg(long)]
    pub dry_run: bool,

    /// Print the collected metrics as JSON on stdout.
    #[arg(long)]
    pub print_metrics: bool,
}

impl DaemonCli {
    /// Observation window, if bounded.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    /// Run name from the command line, or a fresh `run-xxxxxxxx`.
    pub fn run_name(&self) -> String {
        self.run_name.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("run-{}", &id[..8])
        })
    }

    /// Load the config file, then apply environment and CLI overrides.
    ///
    /// A missing file falls back to defaults; the second value reports
    /// whether the file was read.
    pub async fn load_config(&self) -> Result<(CertwatchConfig, bool)> {
        let (mut config, from_file) = match CertwatchConfig::from_file(&self.config).await {
            Ok(config) => (config, true),
            Err(CertwatchError::Config(ConfigError::FileNotFound { .. })) => {
                (CertwatchConfig::default(), false)
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env_overrides();

        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if self.dry_run {
            config.store.backend = "memory".to_owned();
        }

        config.validate()?;
        Ok((config, from_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["certwatch-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/certwatch/certwatch.toml"));
        assert_eq!(cli.test_case, "Observation");
        assert!(cli.duration().is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn generated_run_name_has_prefix() {
        let cli = DaemonCli::parse_from(["certwatch-daemon"]);
        let name = cli.run_name();
        assert!(name.starts_with("run-"));
        assert_eq!(name.len(), 12);
    }

    #[test]
    fn explicit_arguments() {
        let cli = DaemonCli::parse_from([
            "certwatch-daemon",
            "--config",
            "/tmp/cw.toml",
            "--run-name",
            "nightly",
            "--duration-secs",
            "90",
            "--dry-run",
        ]);
        assert_eq!(cli.run_name(), "nightly");
        assert_eq!(cli.duration(), Some(Duration::from_secs(90)));
        assert!(cli.dry_run);
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let cli = DaemonCli::parse_from([
            "certwatch-daemon",
            "--config",
            "/nonexistent/certwatch.toml",
        ]);
        let (config, from_file) = cli.load_config().await.unwrap();
        assert!(!from_file);
        assert_eq!(config.general.log_format, "json");
    }

    #[tokio::test]
    async fn cli_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certwatch.toml");
        std::fs::write(
            &path,
            "[general]\nlog_level = \"debug\"\n\n[store]\nbackend = \"sqlite\"\npath = \"/tmp/cw.db\"\n",
        )
        .unwrap();

        let cli = DaemonCli::parse_from([
            "certwatch-daemon",
            "--config",
            path.to_str().unwrap(),
            "--log-format",
            "pretty",
            "--dry-run",
        ]);
        let (config, from_file) = cli.load_config().await.unwrap();
        assert!(from_file);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.store.backend, "memory");
    }

    #[tokio::test]
    async fn invalid_override_is_rejected() {
        let cli = DaemonCli::parse_from([
            "certwatch-daemon",
            "--config",
            "/nonexistent/certwatch.toml",
            "--log-level",
            "loud",
        ]);
        assert!(cli.load_config().await.is_err());
    }
}
