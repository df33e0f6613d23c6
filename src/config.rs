use std::{path::Path, time::Duration};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTime {
    Second(u64),
    Millisecond(u64),
    Microsecond(u64),
    Nanosecond(u64),
    Minute(u64),
}

impl ConfigTime {
    fn to_duration(self) -> Duration {
        match self {
            Self::Second(n) => Duration::from_secs(n),
            Self::Millisecond(n) => Duration::from_millis(n),
            Self::Microsecond(n) => Duration::from_micros(n),
            Self::Nanosecond(n) => Duration::from_nanos(n),
            Self::Minute(n) => Duration::from_secs(n * 60),
        }
    }
}

impl From<ConfigTime> for Duration {
    fn from(time: ConfigTime) -> Self {
        time.to_duration()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,

    /// Number of actions the sequencer keeps undoable before folding the
    /// oldest into its snapshot.
    pub action_stack_max_size: usize,
    /// Depth of each replica's local redo stack.
    pub redo_list_max_size: usize,

    pub connect_timeout: ConfigTime,
    /// Used by the owner of a client replica, the core never retries on its own.
    pub reconnect_interval: ConfigTime,

    pub max_body_size: u64,
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.into()
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval.into()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(ron::from_str(&text)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| ron::from_str(include_str!("../config/config.ron")).expect("Invalid config file"));

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ConfigTime, CONFIG};

    #[test]
    fn embedded_config_parses() {
        assert_eq!(CONFIG.action_stack_max_size, 200);
        assert_eq!(CONFIG.redo_list_max_size, 20);
        assert_eq!(CONFIG.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn config_time_units() {
        assert_eq!(Duration::from(ConfigTime::Minute(2)), Duration::from_secs(120));
        assert_eq!(
            Duration::from(ConfigTime::Millisecond(1500)),
            Duration::from_millis(1500)
        );
    }
}
