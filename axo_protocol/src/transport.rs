//! Request/response transports.

use crate::config::ClientConfig;
use crate::handler::EndpointHandler;
use crate::wire::{io_error, read_message, write_message};
use axo_types::{AxoError, AxoResult};
use std::io::Cursor;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Carries one multipart request and returns the multipart response.
///
/// A transport holds at most one connection and serves one request at a
/// time.
pub trait Transport: Send {
    /// Human-readable address of the peer.
    fn peer(&self) -> &str;

    /// Drops any existing connection and opens a fresh one.
    fn reconnect(&mut self) -> AxoResult<()>;

    fn request(&mut self, parts: Vec<Vec<u8>>) -> AxoResult<Vec<Vec<u8>>>;

    fn close(&mut self);
}

/// Transport over a plain TCP connection.
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
    receive_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: config.connect_timeout,
            receive_timeout: config.receive_timeout,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&self) -> AxoResult<TcpStream> {
        let addrs = self
            .addr
            .to_socket_addrs()
            .map_err(|err| AxoError::transport(format!("cannot resolve {}: {}", self.addr, err)))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.receive_timeout))
                        .and_then(|_| stream.set_write_timeout(Some(self.receive_timeout)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|err| io_error(err, "configure connection"))?;
                    return Ok(stream);
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(match last_error {
            Some(err) => io_error(err, &format!("connect {}", self.addr)),
            None => AxoError::transport(format!("{} resolved to no address", self.addr)),
        })
    }
}

impl Transport for TcpTransport {
    fn peer(&self) -> &str {
        &self.addr
    }

    fn reconnect(&mut self) -> AxoResult<()> {
        self.stream = None;
        let stream = self.open()?;
        debug!(peer = %self.addr, "connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn request(&mut self, parts: Vec<Vec<u8>>) -> AxoResult<Vec<Vec<u8>>> {
        if self.stream.is_none() {
            self.reconnect()?;
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AxoError::transport(format!("not connected to {}", self.addr)))?;
        let result = write_message(stream, &parts).and_then(|_| {
            read_message(stream)?.ok_or_else(|| AxoError::transport("connection closed by peer"))
        });
        if result.is_err() {
            // The stream may hold half a message; never reuse it.
            self.stream = None;
        }
        result
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// In-process transport that hands requests straight to a handler.
///
/// Requests and responses still go through the stream encoding so both
/// sides see exactly the bytes a TCP peer would.
pub struct LoopbackTransport {
    peer: String,
    handler: Arc<EndpointHandler>,
    connected: bool,
}

impl LoopbackTransport {
    pub fn new(handler: Arc<EndpointHandler>) -> Self {
        Self {
            peer: format!("loopback:{}", handler.endpoint_id()),
            handler,
            connected: false,
        }
    }

    pub fn handler(&self) -> &Arc<EndpointHandler> {
        &self.handler
    }
}

fn through_stream(parts: &[Vec<u8>]) -> AxoResult<Vec<Vec<u8>>> {
    let mut buffer = Vec::new();
    write_message(&mut buffer, parts)?;
    read_message(&mut Cursor::new(buffer))?
        .ok_or_else(|| AxoError::transport("empty loopback message"))
}

impl Transport for LoopbackTransport {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn reconnect(&mut self) -> AxoResult<()> {
        self.connected = true;
        Ok(())
    }

    fn request(&mut self, parts: Vec<Vec<u8>>) -> AxoResult<Vec<Vec<u8>>> {
        self.connected = true;
        let request = through_stream(&parts)?;
        let response = self.handler.handle_parts(request)?;
        through_stream(&response)
    }

    fn close(&mut self) {
        self.connected = false;
    }
}
