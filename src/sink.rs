// src/sink.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message sinks
//!
//! The emission loop only sees the [`Sink`] trait. Broker clients live outside
//! this crate; the sinks here cover logging, JSON-lines output and bounded
//! asynchronous hand-off to a slower sink.

use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::PublishError;
use crate::message::{Key, Message};

/// Receipt for an accepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    /// Encoded message size, zero when only queued
    pub bytes: usize,
    /// Accepted for later dispatch rather than delivered
    pub queued: bool,
}

impl Ack {
    pub fn delivered(topic: &str, bytes: usize) -> Self {
        Self {
            topic: topic.to_string(),
            bytes,
            queued: false,
        }
    }

    pub fn queued(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            bytes: 0,
            queued: true,
        }
    }
}

/// Destination for rendered messages
pub trait Sink: Send + Sync {
    fn publish(&self, topic: &str, key: &Key, message: &Message) -> Result<Ack, PublishError>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn publish(&self, topic: &str, key: &Key, message: &Message) -> Result<Ack, PublishError> {
        (**self).publish(topic, key, message)
    }
}

// =============================================================================
// Logging sink
// =============================================================================

/// Logs every message at info level and drops it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn publish(&self, topic: &str, key: &Key, message: &Message) -> Result<Ack, PublishError> {
        let bytes = message.to_bytes()?;
        tracing::info!(topic = %topic, key = %key, "Successfully generated: {}", message);
        Ok(Ack::delivered(topic, bytes.len()))
    }
}

// =============================================================================
// JSON-lines sink
// =============================================================================

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    key: &'a Key,
    message: &'a Message,
}

/// Writes one `{"topic", "key", "message"}` object per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn publish(&self, topic: &str, key: &Key, message: &Message) -> Result<Ack, PublishError> {
        let mut line = serde_json::to_vec(&Envelope {
            topic,
            key,
            message,
        })?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(Ack::delivered(topic, line.len()))
    }
}

// =============================================================================
// Queued sink
// =============================================================================

struct Pending {
    topic: String,
    key: Key,
    message: Message,
}

/// Bounded hand-off to another sink on a dedicated thread
///
/// `publish` never blocks: when `capacity` messages are already waiting it
/// fails with [`PublishError::QueueFull`]. Dropping the sink drains whatever
/// is still queued.
pub struct QueuedSink {
    sender: Mutex<Option<SyncSender<Pending>>>,
    capacity: usize,
    worker: Option<JoinHandle<()>>,
}

impl QueuedSink {
    pub fn new(inner: Arc<dyn Sink>, capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Pending>(capacity);

        let worker = std::thread::Builder::new()
            .name("eventgen-sink".to_string())
            .spawn(move || {
                for pending in receiver {
                    if let Err(e) = inner.publish(&pending.topic, &pending.key, &pending.message)
                    {
                        tracing::warn!("Queued publish to {} failed: {}", pending.topic, e);
                    }
                }
                tracing::debug!("Sink queue drained");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            capacity,
            worker: Some(worker),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Sink for QueuedSink {
    fn publish(&self, topic: &str, key: &Key, message: &Message) -> Result<Ack, PublishError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PublishError::Closed)?;

        let pending = Pending {
            topic: topic.to_string(),
            key: key.clone(),
            message: message.clone(),
        };
        match sender.try_send(pending) {
            Ok(()) => Ok(Ack::queued(topic)),
            Err(TrySendError::Full(_)) => Err(PublishError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(PublishError::Closed),
        }
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Sink worker panicked");
            }
        }
    }
}
