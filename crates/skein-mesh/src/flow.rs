//! Outbound flow control
//!
//! Each connection keeps a bounded FIFO of encoded envelopes. A message is
//! admitted only if it fits the size limit, the shared heap budget and the
//! queue bound. Draining writes from the front while the link reports
//! capacity and stops at the first sign of backpressure; the transport's
//! next `Sent` or `Poll` event resumes it.

use std::sync::Arc;

use bytes::Bytes;
use skein_core::{LinkError, MemoryTracker, Reservation, SendError};
use tracing::{debug, trace, warn};

use crate::config::MeshConfig;
use crate::connection::Connection;

/// Queue position of an outbound message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    /// Appended to the back, subject to the normal queue limit
    #[default]
    Normal,
    /// Placed at the front, may use the priority headroom
    High,
}

/// Per-connection admission limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueLimits {
    pub(crate) max_message_size: usize,
    pub(crate) max_queue_len: usize,
    pub(crate) capacity: usize,
    pub(crate) min_free_memory: usize,
}

impl QueueLimits {
    pub(crate) fn from_config(config: &MeshConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            max_queue_len: config.max_queue_len,
            capacity: config.queue_capacity(),
            min_free_memory: config.min_free_memory,
        }
    }
}

/// An encoded envelope waiting for the link
///
/// Holds its share of the heap budget until written or discarded.
#[derive(Debug)]
pub(crate) struct QueuedMessage {
    pub(crate) payload: Bytes,
    _reservation: Reservation,
}

impl Connection {
    /// Admit an encoded envelope and try to send it
    ///
    /// A rejected message is never queued. A full queue is still flushed
    /// if the link is ready, but the message that found it full is refused.
    pub fn enqueue(
        &mut self,
        message: impl Into<Bytes>,
        priority: Priority,
        memory: &Arc<MemoryTracker>,
    ) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::ConnectionClosed);
        }

        let payload: Bytes = message.into();
        let limits = self.limits;
        if payload.len() > limits.max_message_size {
            return Err(SendError::MessageTooLarge {
                size: payload.len(),
                limit: limits.max_message_size,
            });
        }

        let reservation = match memory.try_reserve(payload.len(), limits.min_free_memory) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!(connection = %self.id(), error = %e, "Dropping message, heap budget exhausted");
                if self.send_ready {
                    self.drain_once();
                }
                return Err(e);
            }
        };

        let queued = QueuedMessage {
            payload,
            _reservation: reservation,
        };

        match priority {
            Priority::High => {
                if self.queue.len() >= limits.capacity {
                    warn!(
                        connection = %self.id(),
                        capacity = limits.capacity,
                        "Dropping priority message, queue at hard capacity"
                    );
                    return Err(SendError::QueueFull {
                        capacity: limits.capacity,
                    });
                }
                self.queue.push_front(queued);
            }
            Priority::Normal => {
                if self.queue.len() >= limits.max_queue_len {
                    warn!(
                        connection = %self.id(),
                        limit = limits.max_queue_len,
                        "Dropping message, send queue full"
                    );
                    if self.send_ready {
                        self.drain_once();
                    }
                    return Err(SendError::QueueFull {
                        capacity: limits.max_queue_len,
                    });
                }
                self.queue.push_back(queued);
            }
        }

        trace!(connection = %self.id(), queued = self.queue.len(), ?priority, "Message queued");
        if self.send_ready {
            self.drain_once();
        }
        Ok(())
    }

    /// Write queued messages until the link pushes back
    ///
    /// A message larger than the link's free capacity stays at the front
    /// and marks the connection not ready. On a write error the message
    /// also stays queued; fatal faults reach the node through the
    /// transport's own events.
    pub fn drain_once(&mut self) {
        let id = self.id();
        loop {
            let Some(link) = self.link.as_mut() else {
                return;
            };
            let Some(front) = self.queue.front() else {
                return;
            };

            if front.payload.len() > link.send_capacity() {
                trace!(
                    connection = %id,
                    size = front.payload.len(),
                    capacity = link.send_capacity(),
                    "Link full, waiting for send readiness"
                );
                self.send_ready = false;
                return;
            }

            match link.write(&front.payload) {
                Ok(()) => {
                    if let Err(e) = link.flush() {
                        debug!(connection = %id, error = %e, "Flush failed");
                    }
                    self.queue.pop_front();
                }
                Err(LinkError::WouldBlock) => {
                    self.send_ready = false;
                    return;
                }
                Err(e) => {
                    warn!(connection = %id, error = %e, "Link write failed");
                    self.send_ready = false;
                    return;
                }
            }
        }
    }

    /// The link can take more data
    pub fn on_send_ready(&mut self) {
        if !self.is_connected() {
            return;
        }
        self.send_ready = true;
        self.drain_once();
    }

    /// Messages waiting for the link
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the link can currently take writes
    pub fn is_send_ready(&self) -> bool {
        self.send_ready
    }
}
