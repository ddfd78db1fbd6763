//! In-memory fakes of the modem capabilities used by the unit tests.

use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use embedded_io::{ErrorKind, ErrorType, Write};

use crate::transport::{ByteStream, Transport};

/// Scriptable modem with one client socket.
///
/// Failure counters are consumed one per call, so `fail_network_attaches = 1`
/// fails only the next network attach.
#[derive(Debug)]
pub struct FakeTransport {
    pub attach_network_calls: usize,
    pub attach_bearer_calls: usize,
    pub connect_calls: usize,
    pub stop_calls: usize,
    pub fail_network_attaches: usize,
    pub fail_bearer_attaches: usize,
    pub fail_connects: usize,
    pub fail_writes: bool,
    pub last_pin: Option<String>,
    pub last_apn: Option<String>,
    pub last_endpoint: Option<(String, u16)>,
    /// Bytes the server sends back after each successful connect.
    pub response: Vec<u8>,
    /// The server hangs up once its response has been read.
    pub close_when_drained: bool,
    pub socket_open: bool,
    pub incoming: VecDeque<u8>,
    pub written: Vec<u8>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            attach_network_calls: 0,
            attach_bearer_calls: 0,
            connect_calls: 0,
            stop_calls: 0,
            fail_network_attaches: 0,
            fail_bearer_attaches: 0,
            fail_connects: 0,
            fail_writes: false,
            last_pin: None,
            last_apn: None,
            last_endpoint: None,
            response: b"HTTP/1.1 200 OK\r\n\r\n1".to_vec(),
            close_when_drained: true,
            socket_open: false,
            incoming: VecDeque::new(),
            written: Vec::new(),
        }
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_network_calls
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    /// Requests written so far, split on the blank line ending the headers.
    pub fn requests(&self) -> Vec<String> {
        self.written_text()
            .split_inclusive("\r\n\r\n")
            .map(String::from)
            .collect()
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl ErrorType for FakeTransport {
    type Error = ErrorKind;
}

impl Write for FakeTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_writes {
            return Err(ErrorKind::BrokenPipe);
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl ByteStream for FakeTransport {
    fn available(&mut self) -> usize {
        self.incoming.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.incoming.pop_front()
    }
}

impl Transport for FakeTransport {
    fn attach_network(&mut self, pin: &str) -> Result<(), Self::Error> {
        self.attach_network_calls += 1;
        self.last_pin = Some(pin.into());
        if take_failure(&mut self.fail_network_attaches) {
            return Err(ErrorKind::TimedOut);
        }
        Ok(())
    }

    fn attach_bearer(&mut self, apn: &str, _login: &str, _password: &str) -> Result<(), Self::Error> {
        self.attach_bearer_calls += 1;
        self.last_apn = Some(apn.into());
        if take_failure(&mut self.fail_bearer_attaches) {
            return Err(ErrorKind::NotConnected);
        }
        Ok(())
    }

    fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        self.connect_calls += 1;
        self.last_endpoint = Some((host.into(), port));
        if take_failure(&mut self.fail_connects) {
            return Err(ErrorKind::ConnectionRefused);
        }
        self.socket_open = true;
        self.incoming.extend(self.response.iter().copied());
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.socket_open && !(self.close_when_drained && self.incoming.is_empty())
    }

    fn stop(&mut self) {
        self.stop_calls += 1;
        self.socket_open = false;
        self.incoming.clear();
    }
}

/// Serial port of an AT-command modem.
#[derive(Debug, Default)]
pub struct FakePort {
    pub incoming: VecDeque<u8>,
    pub written: Vec<u8>,
}

impl FakePort {
    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().copied());
    }
}

impl ErrorType for FakePort {
    type Error = ErrorKind;
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl ByteStream for FakePort {
    fn available(&mut self) -> usize {
        self.incoming.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.incoming.pop_front()
    }
}
