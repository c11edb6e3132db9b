use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "/etc/dhcpcap.conf";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_RETRANSMIT_SECS: u64 = 4;
const DEFAULT_MAX_RETRANSMITS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interface: Option<String>,
    pub log_filter: String,
    pub retransmit_secs: u64,
    pub max_retransmits: u32,
    pub listen_socket: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            retransmit_secs: DEFAULT_RETRANSMIT_SECS,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            listen_socket: true,
        }
    }
}

impl Config {
    /// Load from `DHCPCAP_CONFIG` (or the default path), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("DHCPCAP_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load from `path`, then apply environment overrides. A missing file
    /// leaves the defaults in place.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            config.apply_file(&content)?;
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `key = value` lines. Blank lines, `#` comments and unknown
    /// keys are skipped.
    pub fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    /// Apply `DHCPCAP_*` overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        const OVERRIDES: [(&str, &str); 5] = [
            ("DHCPCAP_INTERFACE", "interface"),
            ("DHCPCAP_LOG", "log_filter"),
            ("DHCPCAP_RETRANSMIT_SECS", "retransmit_secs"),
            ("DHCPCAP_MAX_RETRANSMITS", "max_retransmits"),
            ("DHCPCAP_LISTEN_SOCKET", "listen_socket"),
        ];

        for (var, key) in OVERRIDES {
            if let Some(value) = lookup(var) {
                self.set(key, value.trim())?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "interface" => {
                self.interface = (!value.is_empty()).then(|| value.to_string());
            }
            "log_filter" => self.log_filter = value.to_string(),
            "retransmit_secs" => {
                self.retransmit_secs = match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => secs,
                    _ => return Err(invalid(key, value)),
                };
            }
            "max_retransmits" => {
                self.max_retransmits = match value.parse::<u32>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(invalid(key, value)),
                };
            }
            "listen_socket" => {
                self.listen_socket = parse_bool(value).ok_or_else(|| invalid(key, value))?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_secs(self.retransmit_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    mod file_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = Config::default();
            assert_eq!(config.interface, None);
            assert_eq!(config.log_filter, "info");
            assert_eq!(config.retransmit_interval(), Duration::from_secs(4));
            assert_eq!(config.max_retransmits, 4);
            assert!(config.listen_socket);
        }

        #[test]
        fn test_apply_file() {
            let mut config = Config::default();
            config
                .apply_file(
                    "# capture settings\n\
                     interface = eth1\n\
                     \n\
                     log_filter=dhcpcap=debug\n\
                     retransmit_secs = 2\n\
                     max_retransmits = 6\n\
                     listen_socket = no\n\
                     unknown_key = whatever\n",
                )
                .unwrap();
            assert_eq!(config.interface.as_deref(), Some("eth1"));
            assert_eq!(config.log_filter, "dhcpcap=debug");
            assert_eq!(config.retransmit_secs, 2);
            assert_eq!(config.max_retransmits, 6);
            assert!(!config.listen_socket);
        }

        #[test]
        fn test_lines_without_separator_are_skipped() {
            let mut config = Config::default();
            config.apply_file("interface\n").unwrap();
            assert_eq!(config, Config::default());
        }

        #[test]
        fn test_empty_interface_means_none() {
            let mut config = Config::default();
            config.apply_file("interface = eth0\ninterface =\n").unwrap();
            assert_eq!(config.interface, None);
        }

        #[test]
        fn test_invalid_number() {
            let mut config = Config::default();
            let err = config.apply_file("retransmit_secs = soon\n").unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid { ref key, ref value }
                    if key == "retransmit_secs" && value == "soon"
            ));
        }

        #[test]
        fn test_zero_retransmit_rejected() {
            let mut config = Config::default();
            assert!(config.apply_file("retransmit_secs = 0\n").is_err());
            assert!(config.apply_file("max_retransmits = 0\n").is_err());
        }

        #[test]
        fn test_invalid_bool() {
            let mut config = Config::default();
            assert!(config.apply_file("listen_socket = maybe\n").is_err());
        }

        #[test]
        fn test_missing_file_gives_defaults() {
            let config = Config::load_from(Path::new("/nonexistent/dhcpcap.conf")).unwrap();
            assert_eq!(config.retransmit_secs, DEFAULT_RETRANSMIT_SECS);
        }
    }

    mod env_tests {
        use super::*;

        fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
            let vars: HashMap<String, String> = vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            move |name: &str| vars.get(name).cloned()
        }

        #[test]
        fn test_env_overrides_file() {
            let mut config = Config::default();
            config.apply_file("interface = eth0\nretransmit_secs = 2\n").unwrap();
            config
                .apply_env(lookup(&[
                    ("DHCPCAP_INTERFACE", "wlan0"),
                    ("DHCPCAP_LISTEN_SOCKET", "false"),
                ]))
                .unwrap();
            assert_eq!(config.interface.as_deref(), Some("wlan0"));
            assert_eq!(config.retransmit_secs, 2);
            assert!(!config.listen_socket);
        }

        #[test]
        fn test_env_invalid_value() {
            let mut config = Config::default();
            let result = config.apply_env(lookup(&[("DHCPCAP_MAX_RETRANSMITS", "-1")]));
            assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        }

        #[test]
        fn test_no_env_keeps_values() {
            let mut config = Config::default();
            config.apply_env(lookup(&[])).unwrap();
            assert_eq!(config, Config::default());
        }
    }
}
