//! Controller configuration from environment variables.

use crate::error::ControllerError;
use std::env;
use std::time::Duration;

/// Environment variable overriding the session resync period, in seconds
pub const RESYNC_PERIOD_ENV: &str = "RESYNC_PERIOD_SECS";

/// Environment variable overriding the event stream capacity
pub const EVENT_BUFFER_ENV: &str = "EVENT_BUFFER";

/// Controller configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Resync period for every watch session; cache default when unset
    pub resync: Option<Duration>,
    /// Event stream capacity; cache default when unset
    pub event_buffer: Option<usize>,
}

impl Config {
    /// Loads the configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resync = match lookup(RESYNC_PERIOD_ENV) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    ControllerError::InvalidConfig(format!("{} must be a number of seconds, got {:?}", RESYNC_PERIOD_ENV, raw))
                })?;
                if secs == 0 {
                    return Err(ControllerError::InvalidConfig(format!("{} must be greater than zero", RESYNC_PERIOD_ENV)));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let event_buffer = match lookup(EVENT_BUFFER_ENV) {
            Some(raw) => {
                let capacity: usize = raw.trim().parse().map_err(|_| {
                    ControllerError::InvalidConfig(format!("{} must be a positive integer, got {:?}", EVENT_BUFFER_ENV, raw))
                })?;
                if capacity == 0 {
                    return Err(ControllerError::InvalidConfig(format!("{} must be greater than zero", EVENT_BUFFER_ENV)));
                }
                Some(capacity)
            }
            None => None,
        };

        Ok(Self { resync, event_buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(load(&[]).unwrap(), Config::default());
    }

    #[test]
    fn test_parses_values() {
        let config = load(&[(RESYNC_PERIOD_ENV, "600"), (EVENT_BUFFER_ENV, " 16 ")]).unwrap();
        assert_eq!(config.resync, Some(Duration::from_secs(600)));
        assert_eq!(config.event_buffer, Some(16));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(load(&[(RESYNC_PERIOD_ENV, "ten")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(load(&[(RESYNC_PERIOD_ENV, "0")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(load(&[(EVENT_BUFFER_ENV, "-1")]), Err(ControllerError::InvalidConfig(_))));
        assert!(matches!(load(&[(EVENT_BUFFER_ENV, "0")]), Err(ControllerError::InvalidConfig(_))));
    }
}
