//! Bounded row channel between one producer and a pool of consumers.
//!
//! Backed by `async_channel::bounded`. The producer owns the only sender:
//! closing or dropping it marks the producer as done, and a consumer's
//! receive only reports "finished" once the channel is both closed and
//! drained, so no buffered row can be lost after the producer completes.

use std::time::Duration;

use async_channel::{Receiver, Sender};

use crate::core::Row;
use crate::error::{Result, TransferError, TimeoutStage};

/// Capacity-limited FIFO of rows with timeout-bounded put and take.
pub struct BoundedChannel {
    tx: Sender<Row>,
    rx: Receiver<Row>,
    capacity: usize,
    timeout: Duration,
}

impl BoundedChannel {
    /// Create a channel holding at most `capacity` rows.
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Occupancy probe for the progress reporter.
    pub fn probe(&self) -> ChannelProbe {
        ChannelProbe {
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }

    /// Split into the producer's writer and a cloneable consumer reader.
    pub fn split(self) -> (ChannelWriter, ChannelReader) {
        (
            ChannelWriter {
                tx: self.tx,
                timeout: self.timeout,
                sent: 0,
            },
            ChannelReader {
                rx: self.rx,
                timeout: self.timeout,
            },
        )
    }
}

/// Producer side.
pub struct ChannelWriter {
    tx: Sender<Row>,
    timeout: Duration,
    sent: u64,
}

impl ChannelWriter {
    /// Enqueue a row, waiting at most the configured timeout for space.
    pub async fn send(&mut self, row: Row) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.tx.send(row)).await {
            Ok(Ok(())) => {
                self.sent += 1;
                Ok(())
            }
            Ok(Err(_)) => Err(TransferError::transfer(
                "channel",
                "all consumers stopped before the producer finished",
            )),
            Err(_) => Err(TransferError::timeout(
                TimeoutStage::ProducerWait,
                self.timeout,
            )),
        }
    }

    /// Rows enqueued so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Mark the producer as done. Rows already queued stay receivable.
    pub fn close(&self) {
        self.tx.close();
    }
}

/// Consumer side. Each consumer holds its own clone.
#[derive(Clone)]
pub struct ChannelReader {
    rx: Receiver<Row>,
    timeout: Duration,
}

impl ChannelReader {
    /// Take the next row. `None` once the producer is done and the channel
    /// is drained; a timeout if no row arrives within the configured bound.
    pub async fn recv(&self) -> Result<Option<Row>> {
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Ok(Ok(row)) => Ok(Some(row)),
            Ok(Err(_)) => Ok(None),
            Err(_) => Err(TransferError::timeout(
                TimeoutStage::ConsumerDrain,
                self.timeout,
            )),
        }
    }
}

/// Read-only view of the channel's occupancy.
#[derive(Clone)]
pub struct ChannelProbe {
    rx: Receiver<Row>,
    capacity: usize,
}

impl ChannelProbe {
    /// Rows currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy as a fraction of capacity.
    pub fn ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}
