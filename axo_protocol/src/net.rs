//! Listener thread shared by the endpoint server and the event publisher.

use axo_types::{AxoError, AxoResult};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How often a stopped listener notices it should exit.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) struct Acceptor {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acceptor {
    /// Binds `addr` and hands every accepted connection to `on_connection`.
    pub(crate) fn spawn<F>(addr: &str, name: &str, mut on_connection: F) -> AxoResult<Self>
    where
        F: FnMut(TcpStream, SocketAddr, Arc<AtomicBool>) + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .map_err(|err| AxoError::transport(format!("cannot bind {}: {}", addr, err)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| AxoError::transport(format!("local address: {}", err)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| AxoError::transport(format!("nonblocking listener: {}", err)))?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", name, local_addr.port()))
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            if let Err(err) = stream.set_nonblocking(false) {
                                warn!(%peer, error = %err, "dropping connection");
                                continue;
                            }
                            debug!(%peer, "accepted connection");
                            on_connection(stream, peer, flag.clone());
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(POLL_INTERVAL);
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
            })
            .map_err(|err| AxoError::internal(format!("cannot spawn listener: {}", err)))?;

        Ok(Self {
            local_addr,
            running,
            handle: Some(handle),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(addr = %self.local_addr, "listener thread panicked");
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}
