//! Best-effort publish/subscribe for [`RecognitionEvent`]s.
//!
//! Delivery is at-most-once with no persistence: a subscriber that is not
//! listening when an event is published never sees it, and publishing never
//! blocks or reports failure to the caller.

use crate::common::{GateError, Result};
use crate::events::RecognitionEvent;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

const MAX_EVENT_BYTES: usize = 64 * 1024;

pub trait EventPublisher: Send + Sync {
    /// Fire-and-forget.
    fn publish(&self, event: &RecognitionEvent);
}

pub trait EventSubscriber: Send {
    /// Waits up to `timeout` for the next event. `Ok(None)` on timeout; an
    /// error means the subscription is gone for good.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RecognitionEvent>>;
}

/// Sends each event as one datagram to every subscriber socket in the topic directory.
pub struct SocketPublisher {
    topic_dir: PathBuf,
    socket: UnixDatagram,
}

impl SocketPublisher {
    pub fn new(topic_dir: impl Into<PathBuf>) -> Result<Self> {
        let topic_dir = topic_dir.into();
        fs::create_dir_all(&topic_dir)?;
        let socket = UnixDatagram::unbound()?;
        // a slow subscriber must never stall the publisher
        socket.set_nonblocking(true)?;
        Ok(Self { topic_dir, socket })
    }

    fn subscriber_sockets(&self) -> Vec<PathBuf> {
        match fs::read_dir(&self.topic_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().map_or(false, |ext| ext == "sock"))
                .collect(),
            Err(e) => {
                tracing::warn!("Cannot list subscribers in {:?}: {}", self.topic_dir, e);
                Vec::new()
            }
        }
    }
}

impl EventPublisher for SocketPublisher {
    fn publish(&self, event: &RecognitionEvent) {
        let payload = match event.to_json() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Dropping event: {}", e);
                return;
            }
        };

        let subscribers = self.subscriber_sockets();
        if subscribers.is_empty() {
            tracing::debug!("No subscribers on {:?}; event dropped", self.topic_dir);
        }

        for path in subscribers {
            match self.socket.send_to(payload.as_bytes(), &path) {
                Ok(_) => tracing::debug!("Published to {:?}: {}", path, payload),
                Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                    tracing::debug!("Removing stale subscriber socket {:?}", path);
                    let _ = fs::remove_file(&path);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    tracing::warn!("Subscriber {:?} is not keeping up; event dropped", path);
                }
                Err(e) => tracing::warn!("Publish to {:?} failed: {}", path, e),
            }
        }
    }
}

/// A datagram socket registered in the topic directory. Removed again on drop.
pub struct SocketSubscriber {
    path: PathBuf,
    socket: UnixDatagram,
    buf: Vec<u8>,
}

impl SocketSubscriber {
    pub fn bind(topic_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(topic_dir)?;
        let path = topic_dir.join(format!("{}.sock", name));
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let socket = UnixDatagram::bind(&path)?;
        tracing::info!("Subscribed to events at {:?}", path);
        Ok(Self {
            path,
            socket,
            buf: vec![0u8; MAX_EVENT_BYTES],
        })
    }
}

impl EventSubscriber for SocketSubscriber {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RecognitionEvent>> {
        // a zero timeout would mean "block forever"
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        loop {
            let len = match self.socket.recv(&mut self.buf) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            };
            match RecognitionEvent::from_json(&self.buf[..len]) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => tracing::warn!("Ignoring malformed event: {}", e),
            }
        }
    }
}

impl Drop for SocketSubscriber {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// In-process fan-out, one queue per subscriber.
#[derive(Default)]
pub struct MemoryChannel {
    subscribers: Mutex<Vec<Sender<RecognitionEvent>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> MemorySubscriber {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        MemorySubscriber { rx }
    }
}

impl EventPublisher for MemoryChannel {
    fn publish(&self, event: &RecognitionEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            // dropped subscribers fall out here
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

pub struct MemorySubscriber {
    rx: Receiver<RecognitionEvent>,
}

impl EventSubscriber for MemorySubscriber {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RecognitionEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GateError::Protocol("event channel closed".into()))
            }
        }
    }
}
