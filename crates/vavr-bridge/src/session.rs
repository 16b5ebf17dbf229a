//! Simulation session and run-loop tick
//!
//! A [`Session`] owns the emulator and every piece of bridge state. Nothing
//! else mutates it: network tasks talk to it through the
//! [`CommandQueue`](crate::queue::CommandQueue) and read its output through
//! [`Session::drain_events`] and [`Session::take_serial_output`].
//!
//! # Tick
//!
//! 1. If running, step the emulator `batch_size` times. Port and UART
//!    notifications raised while stepping go straight to the tracker and the
//!    serial bridge.
//! 2. Drain the command queue and dispatch every item in order.
//! 3. Publish analog duty cycles if the wall-clock gate is due.
//!
//! The caller yields to its scheduler between ticks; `tick` itself never
//! blocks.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::emulator::{cpu_time, Emulator, EmulatorObserver};
use crate::error::BridgeError;
use crate::events::Outbox;
use crate::image::Image;
use crate::pin_map::{PinMap, PortId};
use crate::publish::PublishScheduler;
use crate::queue::{CommandQueue, Inbound};
use crate::serial::SerialBridge;
use crate::tracker::{ListeningMode, PortChangeTracker};
use vavr_protocol::OutboundEvent;

/// Run-loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Stepping the emulator
    Running,
    /// Stepping suspended; commands and publishing continue
    Paused,
    /// Terminal
    Stopped,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Emulator cycle counter
    pub cycles: u64,
    /// Emulated seconds
    pub cpu_time: f64,
    /// Run-loop state
    pub state: RunState,
    /// Pins with a listening mode, sorted by pin id
    pub listening: Vec<(String, ListeningMode)>,
    /// Whether serial traffic is mirrored
    pub serial_debug: bool,
    /// Host bytes still waiting for the UART
    pub serial_pending: usize,
}

/// Everything the emulator's notifications touch while stepping
pub(crate) struct Hooks {
    pub(crate) pin_map: PinMap,
    pub(crate) tracker: PortChangeTracker,
    pub(crate) serial: SerialBridge,
    pub(crate) outbox: Outbox,
    pub(crate) clock_hz: u32,
}

impl EmulatorObserver for Hooks {
    fn port_changed(&mut self, port: PortId, levels: u8, cycle: u64) {
        self.tracker.on_port_change(
            &self.pin_map,
            port,
            levels,
            cycle,
            self.clock_hz,
            &mut self.outbox,
        );
    }

    fn uart_byte_transmitted(&mut self, byte: u8) {
        self.serial.on_transmitted(byte, &mut self.outbox);
    }

    fn uart_rx_ready(&mut self) -> Option<u8> {
        self.serial.on_ready()
    }
}

/// A loaded program running on an emulator
pub struct Session<E: Emulator> {
    pub(crate) emulator: E,
    pub(crate) hooks: Hooks,
    pub(crate) state: RunState,
    queue: CommandQueue,
    scheduler: PublishScheduler,
    batch_size: u32,
}

impl<E: Emulator> Session<E> {
    /// Load `image` into `emulator` and start a session
    ///
    /// Fails without creating a session if the emulator rejects the image.
    pub fn load(
        mut emulator: E,
        image: &Image,
        pin_map: PinMap,
        config: &BridgeConfig,
        queue: CommandQueue,
    ) -> Result<Self, BridgeError> {
        emulator.load_image(image)?;
        info!(bytes = image.len(), "image loaded");
        Ok(Self::new(emulator, pin_map, config, queue))
    }

    /// Start a session on an emulator that already holds its program
    pub fn new(
        emulator: E,
        pin_map: PinMap,
        config: &BridgeConfig,
        queue: CommandQueue,
    ) -> Self {
        let state = if config.pause_on_start {
            info!("paused on start");
            RunState::Paused
        } else {
            RunState::Running
        };
        let clock_hz = emulator.clock_hz();

        Self {
            emulator,
            hooks: Hooks {
                pin_map,
                tracker: PortChangeTracker::new(),
                serial: SerialBridge::new(config.serial_debug),
                outbox: Outbox::new(),
                clock_hz,
            },
            state,
            queue,
            scheduler: PublishScheduler::new(
                config.publish_interval(),
                config.min_diff_to_publish,
            ),
            batch_size: config.batch_size,
        }
    }

    /// Run one tick; returns the state afterwards
    pub fn tick(&mut self, now: Instant) -> RunState {
        if self.state == RunState::Stopped {
            return self.state;
        }

        if self.state == RunState::Running {
            for _ in 0..self.batch_size {
                self.emulator.step(&mut self.hooks);
            }
        }

        for item in self.queue.drain() {
            match item {
                Inbound::Command(envelope) => {
                    if let Err(e) = self.dispatch(&envelope) {
                        warn!("command failed: {}", e);
                    }
                }
                Inbound::Serial(bytes) => {
                    self.hooks.serial.feed(&bytes, &mut self.hooks.outbox);
                }
            }
        }
        if let Some(byte) = self.hooks.serial.start() {
            self.emulator.uart_write_byte(byte);
        }

        if self.scheduler.is_due(now) {
            let Hooks {
                pin_map,
                tracker,
                outbox,
                clock_hz,
                ..
            } = &mut self.hooks;
            self.scheduler.publish(
                now,
                pin_map,
                tracker,
                self.emulator.cycles(),
                *clock_hz,
                outbox,
            );
        }

        if self.queue.is_disconnected() {
            debug!("all command senders dropped");
            self.stop();
        }
        self.state
    }

    /// Enter the terminal state
    pub fn stop(&mut self) {
        if self.state != RunState::Stopped {
            info!(cycles = self.emulator.cycles(), "session stopped");
            self.state = RunState::Stopped;
        }
    }

    /// Current run-loop state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Events produced since the last call, oldest first
    pub fn drain_events(&mut self) -> Vec<OutboundEvent> {
        self.hooks.outbox.drain_events()
    }

    /// Bytes the UART transmitted since the last call
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.hooks.outbox.drain_serial()
    }

    /// The emulator driven by this session
    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    /// Board pin map
    pub fn pin_map(&self) -> &PinMap {
        &self.hooks.pin_map
    }

    /// Pin edge tracker
    pub fn tracker(&self) -> &PortChangeTracker {
        &self.hooks.tracker
    }

    /// Point-in-time view of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        let cycles = self.emulator.cycles();
        SessionSnapshot {
            cycles,
            cpu_time: cpu_time(cycles, self.hooks.clock_hz),
            state: self.state,
            listening: self.hooks.tracker.listening_modes(),
            serial_debug: self.hooks.serial.debug_enabled(),
            serial_pending: self.hooks.serial.pending(),
        }
    }
}
