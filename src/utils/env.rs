// src/utils/env.rs
use log::{debug, info, warn};
use std::env;
use std::str::FromStr;

/// Loads a `.env` file from the working directory (or a parent) if present.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env file loaded: {}", e),
    }
}

/// Reads and parses `key`, falling back to `default` when unset or unparsable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable value {:?} for {}", raw, key);
                default
            }
        },
        Err(_) => default,
    }
}

/// Non-empty string value of `key`.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
