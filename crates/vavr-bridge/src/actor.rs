//! Session actor
//!
//! Drives a [`Session`] on the tokio runtime: tick, publish what the tick
//! produced, answer control requests, yield. All simulation state stays
//! inside the actor task; the rest of the program only holds channel ends.
//!
//! # Example
//!
//! ```rust,ignore
//! use vavr_bridge::{command_queue, spawn_session, BridgeConfig, PinMap, Session};
//! use tokio::sync::{broadcast, mpsc};
//!
//! let (commands, queue) = command_queue();
//! let session = Session::load(emulator, &image, PinMap::uno(), &BridgeConfig::default(), queue)?;
//! let (event_tx, _) = broadcast::channel(1024);
//! let (serial_tx, serial_rx) = mpsc::unbounded_channel();
//!
//! let (handle, task) = spawn_session(session, commands, event_tx.clone(), serial_tx);
//! let snapshot = handle.snapshot().await?;
//! ```

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vavr_protocol::OutboundEvent;

use crate::emulator::Emulator;
use crate::error::SessionClosed;
use crate::queue::CommandSender;
use crate::session::{RunState, Session, SessionSnapshot};

/// How long a paused session sleeps between ticks
pub const PAUSED_TICK: Duration = Duration::from_millis(10);

/// Requests answered by the actor between ticks
#[derive(Debug)]
pub enum SessionControl {
    /// Report the session's current state
    Snapshot {
        /// Channel to send the snapshot back on
        response: oneshot::Sender<SessionSnapshot>,
    },

    /// Stop the session and end the actor
    Shutdown,
}

/// Client-side handle to a running session actor
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<SessionControl>,
    commands: CommandSender,
}

impl SessionHandle {
    /// Wrap the channel ends of a session actor
    pub fn new(control: mpsc::Sender<SessionControl>, commands: CommandSender) -> Self {
        Self { control, commands }
    }

    /// Producer for protocol commands and serial input
    pub fn commands(&self) -> &CommandSender {
        &self.commands
    }

    /// Ask the actor for a snapshot
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionClosed> {
        let (response, rx) = oneshot::channel();
        self.control
            .send(SessionControl::Snapshot { response })
            .await
            .map_err(|_| SessionClosed)?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// Ask the actor to stop
    pub async fn shutdown(&self) {
        let _ = self.control.send(SessionControl::Shutdown).await;
    }
}

/// Run a session until it stops; returns its final snapshot
///
/// Events go to `event_tx` (sending with no subscribers is not an error) and
/// bytes transmitted by the emulated UART go to `serial_tx`, one chunk per
/// tick.
pub async fn run_session<E: Emulator>(
    mut session: Session<E>,
    mut control_rx: mpsc::Receiver<SessionControl>,
    event_tx: broadcast::Sender<OutboundEvent>,
    serial_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> SessionSnapshot {
    info!(state = ?session.state(), "session actor started");

    loop {
        session.tick(tokio::time::Instant::now().into_std());

        for event in session.drain_events() {
            let _ = event_tx.send(event);
        }
        let output = session.take_serial_output();
        if !output.is_empty() && serial_tx.send(output).is_err() {
            debug!("serial output receiver dropped");
        }

        while let Ok(request) = control_rx.try_recv() {
            match request {
                SessionControl::Snapshot { response } => {
                    let _ = response.send(session.snapshot());
                }
                SessionControl::Shutdown => session.stop(),
            }
        }

        match session.state() {
            RunState::Stopped => break,
            RunState::Paused => tokio::time::sleep(PAUSED_TICK).await,
            RunState::Running => tokio::task::yield_now().await,
        }
    }

    let snapshot = session.snapshot();
    info!(cycles = snapshot.cycles, "session actor stopped");
    snapshot
}

/// Spawn [`run_session`] on the current runtime
pub fn spawn_session<E: Emulator + 'static>(
    session: Session<E>,
    commands: CommandSender,
    event_tx: broadcast::Sender<OutboundEvent>,
    serial_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> (SessionHandle, JoinHandle<SessionSnapshot>) {
    let (control_tx, control_rx) = mpsc::channel(16);
    let task = tokio::spawn(run_session(session, control_rx, event_tx, serial_tx));
    (SessionHandle::new(control_tx, commands), task)
}
