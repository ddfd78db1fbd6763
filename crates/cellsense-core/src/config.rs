//! Runtime configuration
//!
//! Built once at startup and passed by reference into the connection
//! manager and the uploader. Defaults follow the stock deployment template;
//! credentials have no meaningful default and must be supplied.

use embassy_time::Duration;

use crate::buffer::MAX_CHUNKS;
use crate::error::ConfigError;
use crate::thingspeak::{Field, fields};

pub const DEFAULT_SERVER_HOST: &str = "api.thingspeak.com";
pub const DEFAULT_SERVER_PORT: u16 = 443;
pub const DEFAULT_APN: &str = "internet";

/// Lease on an attached session before it must be re-established.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Wait for an AT command reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Wait for the server to finish responding to an upload.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_TRANSMIT_INTERVAL: Duration = Duration::from_millis(30_000);
/// Minimum spacing between connection attempts.
pub const DEFAULT_MIN_RETRY_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u8 = 3;
pub const DEFAULT_CHUNKS_PER_UPLOAD: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config<'a> {
    pub modem: ModemConfig<'a>,
    pub server: ServerConfig<'a>,
    pub channel: ChannelConfig<'a>,
    pub timing: TimingConfig,
    pub upload: UploadConfig,
}

/// SIM and packet data credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemConfig<'a> {
    /// SIM PIN, empty if the SIM is not locked
    pub pin: &'a str,
    pub apn: &'a str,
    pub login: &'a str,
    pub password: &'a str,
}

impl Default for ModemConfig<'_> {
    fn default() -> Self {
        Self {
            pin: "",
            apn: DEFAULT_APN,
            login: "",
            password: "",
        }
    }
}

/// Upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
}

impl Default for ServerConfig<'_> {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST,
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// ThingSpeak channel credentials and the field samples are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig<'a> {
    pub write_api_key: &'a str,
    pub read_api_key: &'a str,
    pub channel_id: &'a str,
    pub field: Field,
}

impl Default for ChannelConfig<'_> {
    fn default() -> Self {
        Self {
            write_api_key: "",
            read_api_key: "",
            channel_id: "",
            field: fields::LIGHT_SENSOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub data_timeout: Duration,
    pub sample_interval: Duration,
    pub transmit_interval: Duration,
    pub min_retry_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            transmit_interval: DEFAULT_TRANSMIT_INTERVAL,
            min_retry_interval: DEFAULT_MIN_RETRY_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    /// Groups a full snapshot is split into, 1..=MAX_CHUNKS
    pub chunks_per_upload: usize,
    /// Consecutive failed sends before a cycle is abandoned
    pub max_retry_attempts: u8,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunks_per_upload: DEFAULT_CHUNKS_PER_UPLOAD,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

impl Config<'_> {
    /// Check the values the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.channel.write_api_key.is_empty() {
            return Err(ConfigError::MissingWriteKey);
        }
        let chunks = self.upload.chunks_per_upload;
        if chunks == 0 || chunks > MAX_CHUNKS {
            return Err(ConfigError::InvalidChunkCount {
                got: chunks,
                max: MAX_CHUNKS,
            });
        }
        if self.upload.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidRetryAttempts);
        }
        Ok(())
    }
}
