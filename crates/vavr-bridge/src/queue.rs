//! Inbound command queue
//!
//! Network handlers and serial readers never touch the session directly.
//! They push into this unbounded FIFO, and the run loop drains it at one
//! fixed point per tick. Commands and serial bytes share the queue so their
//! relative order is preserved.

use tokio::sync::mpsc;
use vavr_protocol::Envelope;

use crate::error::SessionClosed;

/// One item waiting for the run loop
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A validated protocol command
    Command(Envelope),
    /// Bytes from the host serial stream, bound for the emulated UART
    Serial(Vec<u8>),
}

/// Producer side of the queue; cheap to clone
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CommandSender {
    /// Queue a command
    pub fn submit(&self, envelope: Envelope) -> Result<(), SessionClosed> {
        self.tx
            .send(Inbound::Command(envelope))
            .map_err(|_| SessionClosed)
    }

    /// Queue bytes for the emulated UART
    pub fn send_serial(&self, bytes: Vec<u8>) -> Result<(), SessionClosed> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Inbound::Serial(bytes))
            .map_err(|_| SessionClosed)
    }

    /// Whether the consuming session is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the queue, owned by the session
#[derive(Debug)]
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Inbound>,
    disconnected: bool,
}

impl CommandQueue {
    /// Take everything queued so far, oldest first
    ///
    /// Never waits; items pushed while draining are picked up by the next
    /// call.
    pub fn drain(&mut self) -> Vec<Inbound> {
        let mut items = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        items
    }

    /// Whether every sender has been dropped and the queue is empty
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

/// Create a connected sender/queue pair
pub fn command_queue() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CommandSender { tx },
        CommandQueue {
            rx,
            disconnected: false,
        },
    )
}
