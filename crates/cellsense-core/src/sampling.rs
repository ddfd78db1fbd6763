//! Periodic sampling of the analog sensor into the sample buffer.

use embassy_time::Duration;
use log::{trace, warn};
use thiserror_no_std::Error;

use crate::buffer::SampleBuffer;
use crate::clock::{Clock, TimerGate};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("Sensor read failed")]
    ReadError,
    #[error("Unknown sensor error")]
    UnknownError,
}

/// A sensor producing a single integer reading, typically a raw ADC count.
pub trait AnalogSensor {
    fn read(&mut self) -> Result<i32, SensorError>;
}

/// What a [`Sampler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// The sampling interval has not elapsed yet.
    Idle,
    Stored(i32),
    /// Read succeeded but the buffer was full; the reading is lost.
    Rejected(i32),
    SensorFailed(SensorError),
}

/// Running totals, so dropped readings are never silent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplerStats {
    pub stored: u32,
    pub rejected: u32,
    pub sensor_failures: u32,
}

/// Reads the sensor once per interval.
pub struct Sampler<S: AnalogSensor> {
    sensor: S,
    gate: TimerGate,
    stats: SamplerStats,
}

impl<S: AnalogSensor> Sampler<S> {
    /// The first reading is taken one `interval` after construction.
    pub fn new(sensor: S, interval: Duration, clock: &impl Clock) -> Self {
        Self {
            sensor,
            gate: TimerGate::start(clock, interval),
            stats: SamplerStats::default(),
        }
    }

    pub fn tick<const CAPACITY: usize>(
        &mut self,
        buffer: &mut SampleBuffer<CAPACITY>,
        clock: &impl Clock,
    ) -> SampleOutcome {
        if !self.gate.is_elapsed(clock) {
            return SampleOutcome::Idle;
        }
        self.gate.reset(clock, None);

        let value = match self.sensor.read() {
            Ok(value) => value,
            Err(e) => {
                self.stats.sensor_failures = self.stats.sensor_failures.saturating_add(1);
                warn!("Sensor read failed: {:?}", e);
                return SampleOutcome::SensorFailed(e);
            }
        };

        match buffer.add_sample(value) {
            Ok(()) => {
                self.stats.stored = self.stats.stored.saturating_add(1);
                trace!("Stored sample {} ({} buffered)", value, buffer.len());
                SampleOutcome::Stored(value)
            }
            Err(e) => {
                self.stats.rejected = self.stats.rejected.saturating_add(1);
                warn!("Sample {} rejected: {}", value, e);
                SampleOutcome::Rejected(value)
            }
        }
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}
