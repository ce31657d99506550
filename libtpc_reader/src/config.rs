use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;

/// Controls for following a file which is still being written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Stop after this many polls without new events. None polls until stopped.
    pub idle_poll_limit: Option<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 400,
            idle_poll_limit: None,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Structure representing the application configuration. Contains the source and output
/// locations and the decoding options.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Path or transport url of the data source
    pub input: String,
    pub output_path: Option<PathBuf>,
    pub tracker_path: Option<PathBuf>,
    /// Offset applied to time bin indices of zero-suppressed data
    pub sample_index_offset_zs: i32,
    pub max_events: Option<usize>,
    pub monitor: MonitorConfig,
}

impl Default for Config {
    /// Generate a new Config object. The input will be empty/invalid
    fn default() -> Self {
        Self {
            input: String::from(""),
            output_path: None,
            tracker_path: None,
            sample_index_offset_zs: 0,
            max_events: None,
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Get the output path. Without an explicit one, the input file name with a .yml suffix
    pub fn get_output_path(&self) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => {
                let stem = self
                    .input
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .split('.')
                    .next()
                    .unwrap_or("");
                let stem = if stem.is_empty() { "events" } else { stem };
                PathBuf::from(format!("{stem}.yml"))
            }
        }
    }

    pub fn has_tracker(&self) -> bool {
        self.tracker_path.is_some()
    }

    pub fn is_event_limited(&self) -> bool {
        self.max_events.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            input: String::from("ssh://daq@host/data/run_0007.mid.lz4"),
            tracker_path: Some(PathBuf::from("/data/run_0007.trk")),
            max_events: Some(10),
            ..Default::default()
        };
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read, config);
        assert!(read.has_tracker());
        assert_eq!(read.get_output_path(), PathBuf::from("run_0007.yml"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_yaml::from_str("input: run_0003.aqs\n").unwrap();
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.monitor.poll_interval(), Duration::from_millis(400));
        assert!(!config.is_event_limited());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::read_config_file(Path::new("/not/a/config.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }
}
