//! Hardware-independent core library for cellsense
//!
//! This crate contains the platform-agnostic logic of a single-sensor
//! cellular uplink: the non-blocking timer gate, the fixed-capacity sample
//! buffer and its chunked serialization, the connection/retry state machine,
//! AT-command helpers, ThingSpeak request builders and the cooperative upload
//! cycle that ties them together.
//!
//! It is `#![no_std]` and does not allocate, so it compiles on small
//! microcontrollers and on desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

pub mod at;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod sampling;
pub mod thingspeak;
pub mod transport;
pub mod uploader;

#[cfg(test)]
mod test_support;

pub use buffer::SampleBuffer;
pub use clock::{Clock, ManualClock, SystemClock, TimerGate};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, ResponseEvent};
pub use error::{BufferError, ConfigError, LinkError};
pub use sampling::{AnalogSensor, SampleOutcome, Sampler, SensorError};
pub use transport::{ByteStream, Transport};
pub use uploader::{UploadProgress, UploadStats, Uploader};
