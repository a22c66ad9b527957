use bytes::BytesMut;
use nbroker_frame::{decode_body, encode_body, Envelope, BODY_SIZE};
use nbroker_sysv::{MessageQueue, MAX_MESSAGE_SIZE};
use tracing::trace;

use crate::error::{BrokerError, Result};

/// Per-instance store of undelivered envelopes.
///
/// Each envelope is tagged with its recipient's pid, so a process can pull
/// exactly its own envelopes. Envelopes for one recipient come back in the
/// order they were enqueued.
#[derive(Debug)]
pub struct Transport {
    queue: MessageQueue,
}

impl Transport {
    pub fn new(queue: MessageQueue) -> Self {
        Self { queue }
    }

    pub fn id(&self) -> i32 {
        self.queue.id()
    }

    /// Append `envelope` without blocking.
    ///
    /// Fails with [`BrokerError::QueueFull`] if the queue is at its limit.
    pub fn enqueue(&self, envelope: &Envelope) -> Result<()> {
        if envelope.recipient() <= 0 {
            return Err(BrokerError::InvalidArgument(format!(
                "recipient pid {} must be positive",
                envelope.recipient()
            )));
        }
        let mut body = BytesMut::with_capacity(BODY_SIZE);
        encode_body(envelope.message(), &mut body);
        self.queue
            .send(i64::from(envelope.recipient()), &body)
            .map_err(BrokerError::from)
    }

    /// Remove and return the oldest envelope addressed to `pid`, if any.
    pub fn try_dequeue_for(&self, pid: i32) -> Result<Option<Envelope>> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let Some(len) = self.queue.try_recv(i64::from(pid), &mut buf)? else {
            return Ok(None);
        };
        let message = decode_body(&buf[..len])?;
        Ok(Some(Envelope::new(pid, message)))
    }

    /// Discard every envelope addressed to `pid`. Returns how many were dropped.
    pub fn purge_for(&self, pid: i32) -> Result<usize> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let mut purged = 0;
        while self.queue.try_recv(i64::from(pid), &mut buf)?.is_some() {
            purged += 1;
        }
        if purged > 0 {
            trace!(id = self.id(), pid, purged, "purged envelopes");
        }
        Ok(purged)
    }

    /// Envelopes currently waiting, across all recipients.
    pub fn pending(&self) -> Result<u64> {
        Ok(self.queue.pending()?)
    }
}
