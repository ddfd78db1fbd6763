//! Simulated cellular modem.
//!
//! The network side speaks AT commands over an in-memory serial port that
//! answers each command line as soon as it is complete. The socket side acts
//! as a tiny ThingSpeak endpoint: it records channel updates, answers field
//! reads with the last recorded value and hangs up after every response.
//!
//! Failures are scripted and deterministic: every `fail_attach_every`-th
//! network attach and every `fail_connect_every`-th socket connect fails.

use std::collections::VecDeque;

use embassy_time::Duration;
use embedded_io::{ErrorKind, ErrorType, Write};
use log::{debug, trace, warn};

use cellsense_core::at::{self, DEFAULT_EXPECTED, ResponseWaiter};
use cellsense_core::{ByteStream, LinkError, SystemClock, Transport};

/// Longest request the simulated server accepts.
const REQUEST_CAPACITY: usize = 4096;

const AT_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Deterministic failure pattern. Zero disables a failure kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModemScript {
    pub fail_attach_every: u32,
    pub fail_connect_every: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModemStats {
    pub attaches: u32,
    pub failed_attaches: u32,
    pub connects: u32,
    pub failed_connects: u32,
    pub updates: u32,
    pub reads: u32,
}

// ---------------------------------------------------------------------------
// AT-command serial port
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimSerial {
    incoming: VecDeque<u8>,
    line: String,
    /// Answer the next command with `ERROR`.
    fail_next: bool,
}

impl SimSerial {
    fn answer(&mut self, command: &str) {
        let reply = if std::mem::take(&mut self.fail_next) {
            "ERROR"
        } else {
            match command {
                "AT+CPIN?" => "+CPIN: READY\r\n\r\nOK",
                "AT+CREG?" => "+CREG: 0,1\r\n\r\nOK",
                "AT+CSQ" => "+CSQ: 17,0\r\n\r\nOK",
                _ => "OK",
            }
        };
        trace!("AT << {}", reply);
        self.incoming.extend(b"\r\n".iter().copied());
        self.incoming.extend(reply.bytes());
        self.incoming.extend(b"\r\n".iter().copied());
    }
}

impl ErrorType for SimSerial {
    type Error = ErrorKind;
}

impl Write for SimSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &byte in buf {
            match byte {
                b'\r' => {}
                b'\n' => {
                    let command = std::mem::take(&mut self.line);
                    self.answer(command.trim());
                }
                _ => self.line.push(char::from(byte)),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl ByteStream for SimSerial {
    fn available(&mut self) -> usize {
        self.incoming.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.incoming.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Modem
// ---------------------------------------------------------------------------

pub struct SimulatedModem {
    serial: SimSerial,
    clock: SystemClock,
    script: ModemScript,
    stats: ModemStats,
    socket_open: bool,
    served: bool,
    request: heapless::Vec<u8, REQUEST_CAPACITY>,
    response: VecDeque<u8>,
    last_field: u8,
    last_value: Option<String>,
}

impl SimulatedModem {
    pub fn new(script: ModemScript) -> Self {
        Self {
            serial: SimSerial::default(),
            clock: SystemClock,
            script,
            stats: ModemStats::default(),
            socket_open: false,
            served: false,
            request: heapless::Vec::new(),
            response: VecDeque::new(),
            last_field: 1,
            last_value: None,
        }
    }

    pub fn stats(&self) -> ModemStats {
        self.stats
    }

    /// Run one AT command and wait for `expected`.
    fn command(&mut self, command: &str, expected: &str) -> Result<(), ErrorKind> {
        at::clear_input(&mut self.serial);
        let mut waiter: ResponseWaiter =
            at::send_command(&mut self.serial, command, expected, AT_TIMEOUT, &self.clock)?;

        // The simulated port has already answered, one poll sees everything.
        // A reply without the expected text is final.
        match waiter.poll_once(&mut self.serial, &self.clock).outcome() {
            Some(Ok(())) => Ok(()),
            result => {
                warn!(
                    "{} failed ({}): {}",
                    command,
                    result.and_then(Result::err).unwrap_or(LinkError::Timeout),
                    String::from_utf8_lossy(waiter.received()).trim()
                );
                Err(ErrorKind::TimedOut)
            }
        }
    }

    fn serve(&mut self) {
        let request = String::from_utf8_lossy(&self.request).into_owned();
        self.request.clear();
        self.served = true;

        let path = request.split_whitespace().nth(1).unwrap_or_default();
        let (status, body) = if path.starts_with("/update?") {
            self.record_update(path);
            self.stats.updates += 1;
            ("200 OK", self.stats.updates.to_string())
        } else if path.starts_with("/channels/") {
            self.stats.reads += 1;
            let value = self.last_value.as_deref().unwrap_or_default();
            (
                "200 OK",
                format!(
                    "{{\"entry_id\":{},\"field{}\":\"{}\"}}",
                    self.stats.updates, self.last_field, value
                ),
            )
        } else {
            ("404 Not Found", String::from("-1"))
        };

        debug!("Server answering {} with {}", path.split('?').next().unwrap_or(path), status);
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        self.response.extend(response.bytes());
    }

    /// Keep the last sample of a `fieldN=<v1>%20<v2>...` update.
    fn record_update(&mut self, path: &str) {
        let Some((_, query)) = path.split_once('?') else {
            return;
        };
        for pair in query.split('&') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            if let Some(field) = name.strip_prefix("field").and_then(|n| n.parse().ok()) {
                self.last_field = field;
                self.last_value = value.rsplit("%20").next().map(str::to_owned);
            }
        }
    }
}

fn scripted_failure(count: u32, every: u32) -> bool {
    every > 0 && count % every == 0
}

impl ErrorType for SimulatedModem {
    type Error = ErrorKind;
}

impl Write for SimulatedModem {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if !self.socket_open {
            return Err(ErrorKind::NotConnected);
        }
        self.request
            .extend_from_slice(buf)
            .map_err(|_| ErrorKind::OutOfMemory)?;
        if self.request.ends_with(b"\r\n\r\n") {
            self.serve();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl ByteStream for SimulatedModem {
    fn available(&mut self) -> usize {
        if self.socket_open { self.response.len() } else { 0 }
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.socket_open {
            self.response.pop_front()
        } else {
            None
        }
    }
}

impl Transport for SimulatedModem {
    fn attach_network(&mut self, pin: &str) -> Result<(), Self::Error> {
        self.stats.attaches += 1;
        if !pin.is_empty() {
            self.command(&format!("AT+CPIN={pin}"), DEFAULT_EXPECTED)?;
        }
        self.command("AT+CPIN?", "READY\r\n\r\nOK\r\n")?;

        if scripted_failure(self.stats.attaches, self.script.fail_attach_every) {
            self.stats.failed_attaches += 1;
            self.serial.fail_next = true;
        }
        self.command("AT+CREG?", DEFAULT_EXPECTED)?;
        self.command("AT+CSQ", DEFAULT_EXPECTED)
    }

    fn attach_bearer(&mut self, apn: &str, login: &str, password: &str) -> Result<(), Self::Error> {
        self.command(&format!("AT+CGDCONT=1,\"IP\",\"{apn}\""), DEFAULT_EXPECTED)?;
        if !login.is_empty() {
            self.command(
                &format!("AT+CGAUTH=1,1,\"{password}\",\"{login}\""),
                DEFAULT_EXPECTED,
            )?;
        }
        self.command("AT+CGACT=1,1", DEFAULT_EXPECTED)
    }

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        self.stats.connects += 1;
        if scripted_failure(self.stats.connects, self.script.fail_connect_every) {
            self.stats.failed_connects += 1;
            warn!("Simulated connect to {}:{} refused", host, port);
            return Err(ErrorKind::ConnectionRefused);
        }

        self.socket_open = true;
        self.served = false;
        self.request.clear();
        self.response.clear();
        trace!("Socket open to {}:{}", host, port);
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        // The server hangs up once its response has been read.
        self.socket_open && (!self.served || !self.response.is_empty())
    }

    fn stop(&mut self) {
        self.socket_open = false;
        self.request.clear();
        self.response.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_follows_script() {
        let mut modem = SimulatedModem::new(ModemScript {
            fail_attach_every: 2,
            fail_connect_every: 0,
        });

        assert!(modem.attach_network("").is_ok());
        assert_eq!(modem.attach_network(""), Err(ErrorKind::TimedOut));
        assert!(modem.attach_network("1234").is_ok());
        assert_eq!(modem.stats().failed_attaches, 1);
        assert!(modem.attach_bearer("internet", "user", "secret").is_ok());
    }

    #[test]
    fn test_update_then_read_back() {
        let mut modem = SimulatedModem::new(ModemScript::default());

        modem.connect("api.thingspeak.com", 443).unwrap();
        modem
            .write_all(b"GET /update?api_key=K&field1=5%2017%20512 HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let mut reply = Vec::new();
        while let Some(byte) = modem.read_byte() {
            reply.push(byte);
        }
        assert!(reply.ends_with(b"\r\n\r\n1"));
        assert!(!modem.is_connected());

        modem.connect("api.thingspeak.com", 443).unwrap();
        assert!(modem.is_connected());
        modem
            .write_all(b"GET /channels/42/fields/1/last.json?api_key=R&results=2 HTTP/1.1\r\n\r\n")
            .unwrap();
        let mut reply = Vec::new();
        while let Some(byte) = modem.read_byte() {
            reply.push(byte);
        }
        assert!(reply.ends_with(b"{\"entry_id\":1,\"field1\":\"512\"}"));
    }

    #[test]
    fn test_write_requires_open_socket() {
        let mut modem = SimulatedModem::new(ModemScript::default());
        assert_eq!(modem.write(b"GET"), Err(ErrorKind::NotConnected));
    }
}
