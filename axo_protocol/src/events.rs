//! Best-effort event fan-out on the event port.
//!
//! Publishing never fails the caller: subscribers that cannot take an event
//! are pruned and the event is simply not delivered to them. TCP subscribers
//! are written from a dedicated delivery thread, so a slow subscriber never
//! holds up the request that produced the event.

use crate::net::Acceptor;
use crate::wire::{io_error, read_message, write_message};
use axo_types::{AxoError, AxoResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A subscriber that cannot take an event within this time is pruned.
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Notification emitted after an endpoint served a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub endpoint_id: String,
    pub topic: String,
    pub operation: String,
    pub status: i32,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        endpoint_id: impl Into<String>,
        topic: impl Into<String>,
        operation: impl Into<String>,
        status: i32,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            topic: topic.into(),
            operation: operation.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Subscribers {
    /// TCP subscribers accepted but not yet taken by the delivery thread.
    joining: Mutex<Vec<TcpStream>>,
    remote_live: AtomicUsize,
    local: Mutex<Vec<Sender<Event>>>,
}

/// Encoded event parts waiting for the delivery thread.
type Outgoing = Vec<Vec<u8>>;

struct Delivery {
    queue: Sender<Outgoing>,
    handle: JoinHandle<()>,
}

impl Delivery {
    fn spawn(subscribers: Arc<Subscribers>, port: u16) -> AxoResult<Self> {
        let (queue, outgoing) = mpsc::channel::<Outgoing>();
        let handle = thread::Builder::new()
            .name(format!("axo-events-delivery-{}", port))
            .spawn(move || {
                let mut streams: Vec<TcpStream> = Vec::new();
                for parts in outgoing {
                    streams.append(&mut subscribers.joining.lock());
                    streams.retain_mut(|stream| match write_message(stream, &parts) {
                        Ok(()) => true,
                        Err(err) => {
                            debug!(error = %err, "pruning event subscriber");
                            subscribers.remote_live.fetch_sub(1, Ordering::SeqCst);
                            false
                        }
                    });
                }
            })
            .map_err(|err| AxoError::internal(format!("cannot spawn event delivery: {}", err)))?;
        Ok(Self { queue, handle })
    }
}

/// Fans events out to in-process and TCP subscribers.
pub struct EventPublisher {
    subscribers: Arc<Subscribers>,
    acceptor: Mutex<Option<Acceptor>>,
    delivery: Mutex<Option<Delivery>>,
}

impl EventPublisher {
    /// Publisher with in-process subscribers only.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Subscribers::default()),
            acceptor: Mutex::new(None),
            delivery: Mutex::new(None),
        }
    }

    /// Publisher that also accepts TCP subscribers on `addr`.
    pub fn bind(addr: &str) -> AxoResult<Self> {
        let subscribers = Arc::new(Subscribers::default());
        let registry = subscribers.clone();
        let acceptor = Acceptor::spawn(addr, "axo-events", move |stream, peer, _| {
            if let Err(err) = stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT)) {
                debug!(%peer, error = %err, "rejecting event subscriber");
                return;
            }
            debug!(%peer, "event subscriber connected");
            registry.joining.lock().push(stream);
            registry.remote_live.fetch_add(1, Ordering::SeqCst);
        })?;
        let delivery = Delivery::spawn(subscribers.clone(), acceptor.local_addr().port())?;
        Ok(Self {
            subscribers,
            acceptor: Mutex::new(Some(acceptor)),
            delivery: Mutex::new(Some(delivery)),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.lock().as_ref().map(Acceptor::local_addr)
    }

    pub fn subscribe_local(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.local.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.remote_live.load(Ordering::SeqCst) + self.subscribers.local.lock().len()
    }

    /// Waits until at least `count` subscribers are attached.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.subscriber_count() < count {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Hands `event` to every live subscriber and returns how many were
    /// reached. In-process subscribers get it immediately; TCP subscribers
    /// are counted once the event is queued for the delivery thread.
    pub fn publish(&self, event: &Event) -> usize {
        let mut delivered = 0;
        self.subscribers
            .local
            .lock()
            .retain(|tx| match tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            });

        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "cannot encode event");
                return delivered;
            }
        };
        if let Some(delivery) = self.delivery.lock().as_ref() {
            let remote = self.subscribers.remote_live.load(Ordering::SeqCst);
            let parts = vec![event.topic.clone().into_bytes(), body];
            if remote > 0 && delivery.queue.send(parts).is_ok() {
                delivered += remote;
            }
        }
        trace!(topic = %event.topic, delivered, "published event");
        delivered
    }

    pub fn shutdown(&self) {
        if let Some(mut acceptor) = self.acceptor.lock().take() {
            acceptor.stop();
        }
        if let Some(delivery) = self.delivery.lock().take() {
            drop(delivery.queue);
            if delivery.handle.join().is_err() {
                debug!("event delivery thread panicked");
            }
        }
        self.subscribers.joining.lock().clear();
        self.subscribers.remote_live.store(0, Ordering::SeqCst);
        self.subscribers.local.lock().clear();
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// TCP subscriber to an [`EventPublisher`].
pub struct EventSubscriber {
    stream: TcpStream,
}

impl EventSubscriber {
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> AxoResult<Self> {
        let stream = TcpStream::connect(addr).map_err(|err| io_error(err, "subscribe"))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| io_error(err, "subscribe"))?;
        Ok(Self { stream })
    }

    /// Blocks for the next event, up to the subscriber's timeout.
    pub fn recv(&mut self) -> AxoResult<Event> {
        let parts = read_message(&mut self.stream)?
            .ok_or_else(|| AxoError::transport("event publisher closed the stream"))?;
        let body = parts
            .get(1)
            .ok_or_else(|| AxoError::transport("event message has no body"))?;
        serde_json::from_slice(body)
            .map_err(|err| AxoError::transport(format!("event body: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_subscribers_receive_events() {
        let publisher = EventPublisher::new();
        let rx = publisher.subscribe_local();
        let event = Event::new("e0", "k1", "METHOD_EXEC", 0);

        assert_eq!(publisher.publish(&event), 1);
        assert_eq!(rx.recv().unwrap(), event);
    }

    #[test]
    fn test_dead_subscribers_are_pruned() {
        let publisher = EventPublisher::new();
        let rx = publisher.subscribe_local();
        drop(rx);
        assert_eq!(publisher.publish(&Event::new("e0", "k", "PING", 0)), 0);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_tcp_subscriber() {
        let publisher = EventPublisher::bind("127.0.0.1:0").unwrap();
        let addr = publisher.local_addr().unwrap();
        let mut subscriber = EventSubscriber::connect(addr, Duration::from_secs(5)).unwrap();
        assert!(publisher.wait_for_subscribers(1, Duration::from_secs(5)));

        let event = Event::new("e0", "k1", "METHOD_EXEC", -2);
        assert_eq!(publisher.publish(&event), 1);
        assert_eq!(subscriber.recv().unwrap(), event);
        publisher.shutdown();
    }

    #[test]
    fn test_stalled_tcp_subscriber_does_not_block_publish() {
        let publisher = EventPublisher::bind("127.0.0.1:0").unwrap();
        let addr = publisher.local_addr().unwrap();
        // Connected but never reads, so its socket buffers fill up.
        let _stalled = TcpStream::connect(addr).unwrap();
        assert!(publisher.wait_for_subscribers(1, Duration::from_secs(5)));
        let rx = publisher.subscribe_local();

        let topic = "t".repeat(1 << 20);
        let started = Instant::now();
        for status in 0..10 {
            publisher.publish(&Event::new("e0", topic.as_str(), "METHOD_EXEC", status));
        }
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "publish waited on a stalled subscriber: {:?}",
            started.elapsed()
        );
        assert!(publisher.subscriber_count() >= 1);

        let statuses: Vec<i32> = rx.try_iter().map(|event| event.status).collect();
        assert_eq!(statuses, (0..10).collect::<Vec<_>>());
        publisher.shutdown();
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
