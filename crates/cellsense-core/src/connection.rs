//! Connection manager for the cellular link.
//!
//! A small state machine on top of a [`Transport`]: it attaches to the
//! network and data bearer, rate limits reconnect attempts, expires attached
//! sessions after a lease, and frames upload requests. None of its methods
//! wait: a failed attempt is simply retried by the driving loop on a later
//! iteration, and the rate limit keeps that from turning into a busy loop.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──attach ok──▶ Connected
//!      ▲                          │                         │
//!      └──────attach failed───────┘          deadline passed│
//!      ▲                                                    ▼
//!      └─────────────── connect() / disconnect() ────── TimedOut
//! ```

use embassy_time::Instant;
use embedded_io::Write;
use log::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::LinkError;
use crate::thingspeak::Method;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// An attach attempt is in flight
    Connecting,
    Connected,
    /// The session outlived its deadline
    TimedOut,
}

/// Result of one [`ConnectionManager::handle_response`] poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEvent {
    /// One response byte was consumed.
    Byte(u8),
    /// Nothing to read yet, the server is still connected.
    Pending,
    /// The server closed the connection and the socket was released.
    Closed,
}

/// Owns the transport and every piece of link state.
///
/// Created once at startup and kept for the lifetime of the process.
pub struct ConnectionManager<'a, T, C>
where
    T: Transport,
    C: Clock,
{
    config: &'a Config<'a>,
    transport: T,
    clock: C,
    state: ConnectionState,
    last_attempt_start: Option<Instant>,
    deadline: Option<Instant>,
    request_open: bool,
}

impl<'a, T, C> ConnectionManager<'a, T, C>
where
    T: Transport,
    C: Clock,
{
    pub fn new(config: &'a Config<'a>, transport: T, clock: C) -> Self {
        Self {
            config,
            transport,
            clock,
            state: ConnectionState::Disconnected,
            last_attempt_start: None,
            deadline: None,
            request_open: false,
        }
    }

    /// Attach to the network and data bearer.
    ///
    /// Succeeds immediately while a session is live. Attempts closer than
    /// `min_retry_interval` to the previous one fail with
    /// [`LinkError::RateLimited`] without touching the transport.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        let now = self.clock.now();
        self.expire_session(now);

        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        if let Some(last) = self.last_attempt_start {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.config.timing.min_retry_interval {
                debug!(
                    "Connect rate limited ({} ms since last attempt)",
                    since_last.as_millis()
                );
                return Err(LinkError::RateLimited);
            }
        }

        self.last_attempt_start = Some(now);
        self.deadline = now.checked_add(self.config.timing.connection_timeout);
        self.state = ConnectionState::Connecting;
        info!("Attempting cellular connection");

        let modem = self.config.modem;
        if let Err(e) = self.transport.attach_network(modem.pin) {
            warn!("Network attach failed: {:?}, will retry later", e);
            self.state = ConnectionState::Disconnected;
            return Err(LinkError::AttachNetwork);
        }
        if let Err(e) = self
            .transport
            .attach_bearer(modem.apn, modem.login, modem.password)
        {
            warn!("Bearer attach on APN {} failed: {:?}, will retry later", modem.apn, e);
            self.state = ConnectionState::Disconnected;
            return Err(LinkError::AttachBearer);
        }

        self.state = ConnectionState::Connected;
        info!("Cellular connection established");
        Ok(())
    }

    /// Connected and still within the session deadline.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.deadline.is_some_and(|deadline| self.clock.now() < deadline)
    }

    /// Release the transport and drop the session. Idempotent.
    pub fn disconnect(&mut self) {
        self.transport.stop();
        self.request_open = false;
        if self.state != ConnectionState::Disconnected {
            info!("Cellular connection closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Expire a session whose deadline has passed.
    ///
    /// Call once per loop iteration.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.expire_session(now);
    }

    /// Open a connection to the configured endpoint and write a request.
    ///
    /// Connects first if no session is ready. Succeeds once the request
    /// bytes are written; the response is consumed separately through
    /// [`handle_response`](Self::handle_response).
    pub fn send_data(&mut self, path: &str, method: Method) -> Result<(), LinkError> {
        if !self.is_ready() {
            self.connect()?;
        }

        let server = self.config.server;
        if let Err(e) = self.transport.connect(server.host, server.port) {
            warn!("Failed to connect to {}:{}: {:?}", server.host, server.port, e);
            return Err(LinkError::TransportConnect);
        }
        self.request_open = true;

        if let Err(e) = self.write_request(path, method) {
            warn!("Failed to write request: {:?}", e);
            self.close_request();
            return Err(LinkError::TransportWrite);
        }

        debug!("Sent {} {}", method.as_str(), path);
        Ok(())
    }

    /// Poll the response once without blocking.
    pub fn handle_response(&mut self) -> ResponseEvent {
        if self.transport.available() > 0 {
            if let Some(byte) = self.transport.read_byte() {
                trace!("rx {:?}", char::from(byte));
                return ResponseEvent::Byte(byte);
            }
        }

        if self.transport.is_connected() {
            return ResponseEvent::Pending;
        }

        if self.request_open {
            info!("Server disconnected");
            self.transport.stop();
            self.request_open = false;
        }
        ResponseEvent::Closed
    }

    /// Give up on the current response and release the socket.
    pub fn close_request(&mut self) {
        if self.request_open {
            self.transport.stop();
            self.request_open = false;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn last_attempt_start(&self) -> Option<Instant> {
        self.last_attempt_start
    }

    /// A request was written and its response has not finished yet.
    pub fn request_open(&self) -> bool {
        self.request_open
    }

    pub fn config(&self) -> &'a Config<'a> {
        self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn expire_session(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if self.deadline.is_some_and(|deadline| now < deadline) {
            return;
        }

        warn!("Cellular session deadline passed, dropping connection");
        self.transport.stop();
        self.request_open = false;
        self.state = ConnectionState::TimedOut;
    }

    fn write_request(&mut self, path: &str, method: Method) -> Result<(), T::Error> {
        let host = self.config.server.host;
        let t = &mut self.transport;
        t.write_all(method.as_str().as_bytes())?;
        t.write_all(b" ")?;
        t.write_all(path.as_bytes())?;
        t.write_all(b" HTTP/1.1\r\n")?;
        t.write_all(b"Host: ")?;
        t.write_all(host.as_bytes())?;
        t.write_all(b"\r\nConnection: close\r\n\r\n")?;
        t.flush()
    }
}
