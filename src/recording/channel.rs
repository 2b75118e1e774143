// src/recording/channel.rs
//! Producer → persister message channel
//!
//! Unbounded single-producer/single-consumer FIFO over `crossbeam-channel`.
//! Sending never blocks; if the persister falls behind, memory grows. The
//! current depth is exposed through [`QueueStats`] so producers can watch it.

use crate::recording::array::NdArray;
use crate::recording::buffer::WriteMode;
use crate::utils::errors::{RecorderError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Command sent to the persister
#[derive(Debug)]
pub enum ChannelMessage {
    Write {
        table: String,
        array: NdArray,
        mode: WriteMode,
    },

    /// Drain once more and stop; always the last message for a handle
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Create a connected sender/receiver pair
pub fn channel() -> (MessageSender, MessageReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let counters = Arc::new(Counters::default());
    (
        MessageSender {
            tx,
            counters: Arc::clone(&counters),
        },
        MessageReceiver { rx, counters },
    )
}

/// Producer side
#[derive(Debug)]
pub struct MessageSender {
    tx: Sender<ChannelMessage>,
    counters: Arc<Counters>,
}

impl MessageSender {
    /// Enqueue a message (non-blocking)
    pub fn send(&self, message: ChannelMessage) -> Result<()> {
        let bytes = match &message {
            ChannelMessage::Write { array, .. } => array.nbytes() as u64,
            ChannelMessage::Shutdown => 0,
        };

        self.tx.send(message).map_err(|_| {
            RecorderError::IllegalState("Recorder process is no longer running".to_string())
        })?;

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            depth: self.tx.len(),
        }
    }
}

/// Outcome of a bounded wait on the channel
#[derive(Debug)]
pub enum Received {
    Message(ChannelMessage),
    Timeout,
    /// Every sender is gone
    Disconnected,
}

/// Persister side
#[derive(Debug)]
pub struct MessageReceiver {
    rx: Receiver<ChannelMessage>,
    counters: Arc<Counters>,
}

impl MessageReceiver {
    /// Wait at most `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                Received::Message(message)
            }
            Err(RecvTimeoutError::Timeout) => Received::Timeout,
            Err(RecvTimeoutError::Disconnected) => Received::Disconnected,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Channel statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages enqueued by the producer
    pub sent: u64,

    /// Messages taken by the persister
    pub received: u64,

    /// Array payload bytes enqueued
    pub bytes_sent: u64,

    /// Messages currently waiting
    pub depth: usize,
}
