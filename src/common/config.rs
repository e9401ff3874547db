//! # Configuration Utilities
//!
//! Tuning knobs shared by connections and listeners, plus TOML loading.
//!
//! Every field has a default, so an empty file (or no file at all) yields a working
//! configuration:
//!
//! ```toml
//! bind_address = "0.0.0.0:8080"
//! poll_interval_ms = 100
//! accept_poll_interval_ms = 1000
//! max_frame_len = 2147483647
//! nodelay = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use super::error::{Result, TransportError};
use super::framing::MAX_FRAME_LEN;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err(TransportError::Config)`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: TransportConfig = load_config("config/echo.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .map_err(|e| TransportError::config(format!("cannot read {}: {}", path, e)))?;
    let config: T = toml::from_str(&content)
        .map_err(|e| TransportError::config(format!("cannot parse {}: {}", path, e)))?;
    Ok(config)
}

/// Transport configuration passed to every Connection and Listener at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address a listener binds to when none is given explicitly
    pub bind_address: String,
    /// How long the receive pump waits for readability before re-checking cancellation (ms)
    pub poll_interval_ms: u64,
    /// How long the accept loop waits for a client before re-checking cancellation (ms)
    pub accept_poll_interval_ms: u64,
    /// Largest payload accepted on send and on receive (bytes)
    pub max_frame_len: usize,
    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            poll_interval_ms: 100,
            accept_poll_interval_ms: 1000,
            max_frame_len: MAX_FRAME_LEN,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let config: TransportConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the polling loops or the wire format.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TransportError::config("poll_interval_ms must be non-zero"));
        }
        if self.accept_poll_interval_ms == 0 {
            return Err(TransportError::config(
                "accept_poll_interval_ms must be non-zero",
            ));
        }
        if self.max_frame_len == 0 || self.max_frame_len > MAX_FRAME_LEN {
            return Err(TransportError::config(format!(
                "max_frame_len must be within 1..={}",
                MAX_FRAME_LEN
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }
}
