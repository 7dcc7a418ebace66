use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub frontend_origin: String,
    pub bind_addr: String,
    /// Envelopes retained per channel for reconnect backfill.
    pub event_backlog: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_backlog = match lookup("EVENT_BACKLOG") {
            Some(raw) => raw.parse::<usize>().map_err(|e| ConfigError::Invalid {
                var: "EVENT_BACKLOG",
                reason: e.to_string(),
            })?,
            None => 256,
        };
        if event_backlog == 0 {
            return Err(ConfigError::Invalid {
                var: "EVENT_BACKLOG",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            mongo_uri: lookup("MONGO_URI").ok_or(ConfigError::Missing("MONGO_URI"))?,
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "laundry_hub".to_string()),
            jwt_secret: lookup("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            frontend_origin: lookup("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            event_backlog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let config = Config::from_lookup(lookup_from(&[
            ("MONGO_URI", "mongodb://localhost:27017"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.database_name, "laundry_hub");
        assert_eq!(config.frontend_origin, "http://localhost:3000");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.event_backlog, 256);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("MONGO_URI", "mongodb://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn backlog_must_be_positive_number() {
        let base = [
            ("MONGO_URI", "mongodb://x"),
            ("JWT_SECRET", "s"),
            ("EVENT_BACKLOG", "lots"),
        ];
        assert!(Config::from_lookup(lookup_from(&base)).is_err());

        let zero = [
            ("MONGO_URI", "mongodb://x"),
            ("JWT_SECRET", "s"),
            ("EVENT_BACKLOG", "0"),
        ];
        assert!(Config::from_lookup(lookup_from(&zero)).is_err());
    }
}
