//! TCP endpoint server.

use crate::handler::EndpointHandler;
use crate::net::{Acceptor, POLL_INTERVAL};
use crate::wire::{read_message, write_message};
use axo_types::AxoResult;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Serves an [`EndpointHandler`] on a TCP request port.
///
/// Every connection gets its own thread and is served until the peer hangs
/// up or the server shuts down.
pub struct EndpointServer {
    handler: Arc<EndpointHandler>,
    acceptor: Acceptor,
}

impl EndpointServer {
    pub fn bind(addr: &str, handler: Arc<EndpointHandler>) -> AxoResult<Self> {
        Self::bind_with_timeout(addr, handler, Duration::from_secs(60))
    }

    /// Like [`bind`](Self::bind), bounding how long a half-received request
    /// may stall.
    pub fn bind_with_timeout(
        addr: &str,
        handler: Arc<EndpointHandler>,
        receive_timeout: Duration,
    ) -> AxoResult<Self> {
        let shared = handler.clone();
        let acceptor = Acceptor::spawn(addr, "axo-endpoint", move |stream, peer, running| {
            let handler = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("axo-conn-{}", peer))
                .spawn(move || serve_connection(stream, peer, handler, running, receive_timeout));
            if let Err(err) = spawned {
                warn!(%peer, error = %err, "cannot spawn connection thread");
            }
        })?;
        info!(
            endpoint_id = handler.endpoint_id(),
            addr = %acceptor.local_addr(),
            "endpoint server listening"
        );
        Ok(Self { handler, acceptor })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn handler(&self) -> &Arc<EndpointHandler> {
        &self.handler
    }

    pub fn shutdown(&mut self) {
        self.acceptor.stop();
        debug!(endpoint_id = self.handler.endpoint_id(), "endpoint server stopped");
    }
}

/// Waits for the next request without consuming any of it.
fn wait_readable(stream: &TcpStream, running: &AtomicBool) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    stream.set_read_timeout(Some(POLL_INTERVAL * 5))?;
    while running.load(Ordering::SeqCst) {
        match stream.peek(&mut probe) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut => {}
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<EndpointHandler>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
) {
    loop {
        match wait_readable(&stream, &running) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                debug!(%peer, error = %err, "connection failed");
                break;
            }
        }
        if let Err(err) = stream.set_read_timeout(Some(receive_timeout)) {
            debug!(%peer, error = %err, "connection failed");
            break;
        }
        let parts = match read_message(&mut stream) {
            Ok(Some(parts)) => parts,
            Ok(None) => break,
            Err(err) => {
                warn!(%peer, error = %err, "unreadable request");
                break;
            }
        };
        let response = match handler.handle_parts(parts) {
            Ok(response) => response,
            Err(err) => {
                warn!(%peer, error = %err, "cannot encode response");
                break;
            }
        };
        if let Err(err) = write_message(&mut stream, &response) {
            debug!(%peer, error = %err, "cannot send response");
            break;
        }
    }
    debug!(%peer, "connection closed");
}
