//! Capabilities the core consumes from the modem driver.
//!
//! The real implementation sits on top of the modem's AT-command transport
//! and is board specific. The core only needs the operations below, which
//! also makes it testable against an in-memory fake.

use embedded_io::Write;

/// A byte stream that can be polled without blocking.
///
/// Writes go through [`embedded_io::Write`]; reads are byte-at-a-time so a
/// single loop iteration never consumes more than it can handle.
pub trait ByteStream: Write {
    /// Number of bytes that can be read right now.
    fn available(&mut self) -> usize;

    /// Read one byte if any is buffered.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Network link of a cellular modem plus a single client socket.
pub trait Transport: ByteStream {
    /// Register with the cellular network, unlocking the SIM with `pin`
    /// (empty when the SIM has no PIN).
    fn attach_network(&mut self, pin: &str) -> Result<(), Self::Error>;

    /// Bring up the packet data bearer.
    fn attach_bearer(&mut self, apn: &str, login: &str, password: &str)
    -> Result<(), Self::Error>;

    /// Open the client socket to `host:port`.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), Self::Error>;

    /// Whether the client socket is still open.
    fn is_connected(&mut self) -> bool;

    /// Close the client socket and release its resources. Idempotent.
    fn stop(&mut self);
}
