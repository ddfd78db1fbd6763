//! Desktop simulator for the cellsense uplink.
//!
//! Runs the sampler, connection manager and uploader in one cooperative loop
//! against a synthetic light sensor and a simulated modem. By default time is
//! simulated and runs as fast as the host allows; set `CELLSENSE_REALTIME=1`
//! to run against the wall clock instead.
//!
//! # Environment
//!
//! Variables may also be placed in a `.env` file in the working directory.
//!
//! | Variable                        | Default              |
//! |---------------------------------|----------------------|
//! | `CELLSENSE_WRITE_API_KEY`       | `SIMULATED`          |
//! | `CELLSENSE_READ_API_KEY`        | `SIMULATED`          |
//! | `CELLSENSE_CHANNEL_ID`          | `0000000`            |
//! | `CELLSENSE_SIM_PIN`             | (none)               |
//! | `CELLSENSE_APN`                 | `internet`           |
//! | `CELLSENSE_HOST`                | `api.thingspeak.com` |
//! | `CELLSENSE_PORT`                | `443`                |
//! | `CELLSENSE_CHUNKS`              | `2`                  |
//! | `CELLSENSE_TRANSMIT_SECS`       | `30`                 |
//! | `CELLSENSE_RUN_SECS`            | `3600`               |
//! | `CELLSENSE_FAIL_ATTACH_EVERY`   | `4`                  |
//! | `CELLSENSE_FAIL_CONNECT_EVERY`  | `7`                  |
//! | `CELLSENSE_REALTIME`            | off                  |
//! | `CELLSENSE_READ_BACK`           | on                   |

use std::env;
use std::str::FromStr;

use embassy_time::{Duration, Instant};
use log::{error, info, warn};

use cellsense_core::buffer::SAMPLE_CAPACITY;
use cellsense_core::config::{
    ChannelConfig, DEFAULT_APN, DEFAULT_CHUNKS_PER_UPLOAD, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_PORT, ModemConfig, ServerConfig, TimingConfig, UploadConfig,
};
use cellsense_core::thingspeak::{self, DEFAULT_READ_RESULTS, Method};
use cellsense_core::{
    AnalogSensor, Clock, Config, ConnectionManager, LinkError, ManualClock, ResponseEvent,
    SampleBuffer, Sampler, SensorError, SystemClock, TimerGate, Transport, UploadProgress,
    Uploader,
};

mod modem;

use modem::{ModemScript, SimulatedModem};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Simulated time per loop iteration in accelerated mode.
const SIM_STEP: Duration = Duration::from_millis(100);

/// Wall-clock pause per loop iteration in real-time mode.
const REALTIME_STEP: std::time::Duration = std::time::Duration::from_millis(10);

/// Every n-th sensor read fails.
const SENSOR_FAIL_EVERY: u32 = 97;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Owned settings read from the environment. [`Config`] borrows from it.
struct Settings {
    write_key: String,
    read_key: String,
    channel_id: String,
    pin: String,
    apn: String,
    host: String,
    port: u16,
    chunks: usize,
    transmit_secs: u64,
    run_secs: u64,
    realtime: bool,
    read_back: bool,
    script: ModemScript,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            write_key: env_string("CELLSENSE_WRITE_API_KEY", "SIMULATED"),
            read_key: env_string("CELLSENSE_READ_API_KEY", "SIMULATED"),
            channel_id: env_string("CELLSENSE_CHANNEL_ID", "0000000"),
            pin: env_string("CELLSENSE_SIM_PIN", ""),
            apn: env_string("CELLSENSE_APN", DEFAULT_APN),
            host: env_string("CELLSENSE_HOST", DEFAULT_SERVER_HOST),
            port: env_parse("CELLSENSE_PORT", DEFAULT_SERVER_PORT),
            chunks: env_parse("CELLSENSE_CHUNKS", DEFAULT_CHUNKS_PER_UPLOAD),
            transmit_secs: env_parse("CELLSENSE_TRANSMIT_SECS", 30),
            run_secs: env_parse("CELLSENSE_RUN_SECS", 3_600),
            realtime: env_flag("CELLSENSE_REALTIME", false),
            read_back: env_flag("CELLSENSE_READ_BACK", true),
            script: ModemScript {
                fail_attach_every: env_parse("CELLSENSE_FAIL_ATTACH_EVERY", 4),
                fail_connect_every: env_parse("CELLSENSE_FAIL_CONNECT_EVERY", 7),
            },
        }
    }

    fn config(&self) -> Config<'_> {
        Config {
            modem: ModemConfig {
                pin: &self.pin,
                apn: &self.apn,
                ..Default::default()
            },
            server: ServerConfig {
                host: &self.host,
                port: self.port,
            },
            channel: ChannelConfig {
                write_api_key: &self.write_key,
                read_api_key: &self.read_key,
                channel_id: &self.channel_id,
                ..Default::default()
            },
            timing: TimingConfig {
                transmit_interval: Duration::from_secs(self.transmit_secs),
                ..Default::default()
            },
            upload: UploadConfig {
                chunks_per_upload: self.chunks,
                ..Default::default()
            },
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Mock sensor
// ---------------------------------------------------------------------------

/// Light sensor on a 10-bit ADC: a slow day/night swing plus jitter.
struct MockAnalogSensor {
    reads: u32,
    noise: u32,
}

impl MockAnalogSensor {
    fn new() -> Self {
        Self {
            reads: 0,
            noise: 0x2545_F491,
        }
    }
}

impl AnalogSensor for MockAnalogSensor {
    fn read(&mut self) -> Result<i32, SensorError> {
        self.reads += 1;
        if self.reads % SENSOR_FAIL_EVERY == 0 {
            return Err(SensorError::ReadError);
        }

        // xorshift32
        self.noise ^= self.noise << 13;
        self.noise ^= self.noise >> 17;
        self.noise ^= self.noise << 5;

        let t = f64::from(self.reads);
        let level = 512.0 + 300.0 * (t / 60.0).sin() + 40.0 * (t / 7.0).cos();
        let jitter = (self.noise % 21) as i32 - 10;
        Ok((level as i32 + jitter).clamp(0, 1023))
    }
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

fn run<C: Clock>(config: &Config<'_>, settings: &Settings, clock: &C, mut step: impl FnMut()) {
    let mut buffer = SampleBuffer::<SAMPLE_CAPACITY>::new();
    let mut sampler = Sampler::new(MockAnalogSensor::new(), config.timing.sample_interval, clock);
    let mut link = ConnectionManager::new(config, SimulatedModem::new(settings.script), clock);
    let mut uploader = Uploader::new(config, clock);

    let end = clock
        .now()
        .checked_add(Duration::from_secs(settings.run_secs))
        .unwrap_or(Instant::MAX);

    while clock.now() < end {
        // --- Sampling -----------------------------------------------------
        sampler.tick(&mut buffer, clock);

        // --- Link housekeeping --------------------------------------------
        link.tick();

        // --- Upload -------------------------------------------------------
        match uploader.tick(&mut buffer, &mut link) {
            UploadProgress::Completed { samples } => {
                info!("[{:>6} s] uploaded {} samples", clock.now().as_secs(), samples);
            }
            UploadProgress::Abandoned(e) => {
                warn!(
                    "[{:>6} s] upload abandoned ({}), {} samples buffered",
                    clock.now().as_secs(),
                    e,
                    buffer.len()
                );
            }
            _ => {}
        }

        step();
    }

    if settings.read_back {
        read_back(&mut link, clock, &mut step);
    }

    info!("Sampler: {:?}", sampler.stats());
    info!("Uploader: {:?}", uploader.stats());
    info!("Modem: {:?}", link.transport().stats());
    info!("{} samples left in the buffer", buffer.len());
}

/// Fetch the latest value of the upload field from the server.
fn read_back<T, L>(link: &mut ConnectionManager<'_, T, L>, clock: &impl Clock, step: &mut impl FnMut())
where
    T: Transport,
    L: Clock,
{
    let config = link.config();
    let channel = config.channel;
    let path = match thingspeak::read_path(&channel, channel.field, DEFAULT_READ_RESULTS) {
        Ok(path) => path,
        Err(e) => {
            error!("Cannot build read request: {}", e);
            return;
        }
    };

    // A recent failed attach may still hold the link off.
    let gate = TimerGate::start(clock, config.timing.min_retry_interval);
    loop {
        match link.send_data(&path, Method::Get) {
            Ok(()) => break,
            Err(LinkError::RateLimited) if !gate.is_elapsed(clock) => step(),
            Err(e) => {
                warn!("Read-back failed: {}", e);
                return;
            }
        }
    }

    let gate = TimerGate::start(clock, config.timing.data_timeout);
    let mut response = Vec::new();
    loop {
        match link.handle_response() {
            ResponseEvent::Byte(byte) => response.push(byte),
            ResponseEvent::Pending if !gate.is_elapsed(clock) => step(),
            ResponseEvent::Pending => {
                link.close_request();
                break;
            }
            ResponseEvent::Closed => break,
        }
    }

    let text = String::from_utf8_lossy(&response);
    let body = text.split_once("\r\n\r\n").map_or(text.as_ref(), |(_, body)| body);
    info!("Read back field {}: {}", channel.field.number(), body);
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    // Load .env first so it can set RUST_LOG too.
    let dotenv = dotenvy::dotenv();
    env_logger::init();
    info!("Starting cellsense simulator");
    if let Ok(path) = dotenv {
        info!("Loaded settings from {}", path.display());
    }

    let settings = Settings::from_env();
    let config = settings.config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!(
        "Uploading to {}:{} field {} in {} chunk(s), transmit every {} s",
        config.server.host,
        config.server.port,
        config.channel.field.number(),
        config.upload.chunks_per_upload,
        settings.transmit_secs
    );

    if settings.realtime {
        info!("Real-time mode, running {} s", settings.run_secs);
        let clock = SystemClock;
        run(&config, &settings, &clock, || std::thread::sleep(REALTIME_STEP));
    } else {
        info!("Accelerated mode, simulating {} s", settings.run_secs);
        let clock = ManualClock::new();
        run(&config, &settings, &clock, || clock.advance(SIM_STEP));
    }

    info!("Simulator exiting");
}
