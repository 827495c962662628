//! Application settings and paths.
//!
//! Manages XDG-compliant paths for configuration and data, and the
//! `settings.json` file that tunes scanning and SSH behaviour.

use crate::error::{ConfigError, ConfigResult};
use crate::scanner::ScanOptions;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory paths following the XDG Base Directory Specification.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Configuration directory (~/.config/idiot)
    pub config_dir: PathBuf,
    /// Data directory (~/.local/share/idiot)
    pub data_dir: PathBuf,
}

impl Paths {
    /// Resolve the XDG directories and create them if needed.
    pub fn new() -> ConfigResult<Self> {
        let project =
            ProjectDirs::from("com", "idiot", "idiot").ok_or(ConfigError::DirectoryNotFound)?;

        Self::at(project.config_dir(), project.data_dir())
    }

    /// Use explicit directories, creating them if needed.
    pub fn at(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let paths = Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        };

        for dir in [&paths.config_dir, &paths.data_dir] {
            fs::create_dir_all(dir).map_err(|e| ConfigError::WriteFailed {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(paths)
    }

    /// Get the path to the settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    /// Get the path to the saved devices file.
    pub fn devices_file(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }
}

/// Application-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Verbose logging.
    pub debug: bool,
    /// Verify SSH host keys against known_hosts. Disabling this accepts any key.
    pub ssh_secure_mode: bool,
    /// Known-hosts file; defaults to `~/.ssh/known_hosts`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,
    /// Overall ICMP sweep deadline.
    pub icmp_timeout_ms: u64,
    /// ICMP receive poll interval.
    pub icmp_poll_ms: u64,
    /// Echo requests per second.
    pub icmp_send_rate: u32,
    /// Overall mDNS query deadline.
    pub mdns_timeout_ms: u64,
    /// mDNS entry channel capacity.
    pub mdns_buffer: usize,
    /// SSH reachability connect timeout.
    pub ssh_probe_timeout_ms: u64,
    /// Reverse DNS lookup timeout.
    pub dns_timeout_ms: u64,
    /// SSH port for probing and connecting.
    pub ssh_port: u16,
    /// Maximum in-flight enrichment probes per kind.
    pub probe_concurrency: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            debug: false,
            ssh_secure_mode: true,
            known_hosts_path: None,
            icmp_timeout_ms: 3000,
            icmp_poll_ms: 100,
            icmp_send_rate: 1000,
            mdns_timeout_ms: 2000,
            mdns_buffer: 100,
            ssh_probe_timeout_ms: 1000,
            dns_timeout_ms: 2000,
            ssh_port: 22,
            probe_concurrency: 64,
        }
    }
}

impl AppSettings {
    /// Load settings from the default location, writing defaults on first run.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let file = paths.settings_file();

        if !file.exists() {
            let settings = Self::default();
            settings.save_to(&file)?;
            return Ok(settings);
        }

        Self::load_from(&file)
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let settings: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a specific file.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Reject values that would stall or disable a scan.
    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            ("icmp_timeout_ms", self.icmp_timeout_ms == 0),
            ("icmp_poll_ms", self.icmp_poll_ms == 0),
            ("icmp_send_rate", self.icmp_send_rate == 0),
            ("mdns_timeout_ms", self.mdns_timeout_ms == 0),
            ("mdns_buffer", self.mdns_buffer == 0),
            ("ssh_probe_timeout_ms", self.ssh_probe_timeout_ms == 0),
            ("dns_timeout_ms", self.dns_timeout_ms == 0),
            ("ssh_port", self.ssh_port == 0),
            ("probe_concurrency", self.probe_concurrency == 0),
        ];

        match checks.iter().find(|(_, invalid)| *invalid) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("{} must be greater than 0", name))),
            None => Ok(()),
        }
    }

    /// Scan tuning derived from these settings.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            icmp_timeout: Duration::from_millis(self.icmp_timeout_ms),
            icmp_poll: Duration::from_millis(self.icmp_poll_ms),
            icmp_send_rate: self.icmp_send_rate,
            mdns_timeout: Duration::from_millis(self.mdns_timeout_ms),
            mdns_buffer: self.mdns_buffer,
            ssh_probe_timeout: Duration::from_millis(self.ssh_probe_timeout_ms),
            dns_timeout: Duration::from_millis(self.dns_timeout_ms),
            ssh_port: self.ssh_port,
            probe_concurrency: self.probe_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert!(settings.ssh_secure_mode);
        assert!(!settings.debug);
        assert_eq!(settings.icmp_timeout_ms, 3000);
        assert_eq!(settings.probe_concurrency, 64);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::at(dir.path().join("config"), dir.path().join("data")).unwrap();

        let settings = AppSettings::load(&paths).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert!(paths.settings_file().exists());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("settings.json");
        fs::write(&file, r#"{ "ssh_secure_mode": false, "debug": true }"#).unwrap();

        let settings = AppSettings::load_from(&file).unwrap();
        assert!(!settings.ssh_secure_mode);
        assert!(settings.debug);
        assert_eq!(settings.mdns_timeout_ms, 2000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("settings.json");
        fs::write(&file, r#"{ "probe_concurrency": 0 }"#).unwrap();
        assert!(matches!(
            AppSettings::load_from(&file),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&file, "not json").unwrap();
        assert!(matches!(
            AppSettings::load_from(&file),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_scan_options() {
        let settings = AppSettings {
            icmp_timeout_ms: 5000,
            probe_concurrency: 16,
            ..Default::default()
        };
        let options = settings.scan_options();
        assert_eq!(options.icmp_timeout, Duration::from_secs(5));
        assert_eq!(options.probe_concurrency, 16);
        assert_eq!(options.icmp_poll, Duration::from_millis(100));
    }
}
