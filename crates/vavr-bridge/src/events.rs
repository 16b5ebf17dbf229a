//! Outbound event buffer
//!
//! Everything the session produces during a tick (pin reports, serial
//! mirrors, acknowledgements and bytes for the host serial stream) is
//! collected here and drained by the driver once the tick is over. This
//! keeps the session free of any channel or runtime dependency.

use vavr_protocol::{Acknowledgement, OutboundEvent, PinStateEvent, SerialDebugEvent};

/// Per-tick output of a session
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<OutboundEvent>,
    serial_out: Vec<u8>,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pin report
    pub fn pin_state(&mut self, event: PinStateEvent) {
        #[cfg(feature = "legacy-pin-alias")]
        if let Some(alias) = legacy_alias(&event) {
            self.events.push(OutboundEvent::PinState(event));
            self.events.push(OutboundEvent::PinState(alias));
            return;
        }
        self.events.push(OutboundEvent::PinState(event));
    }

    /// Queue a serial mirror event
    pub fn serial_debug(&mut self, event: SerialDebugEvent) {
        self.events.push(OutboundEvent::SerialDebug(event));
    }

    /// Queue an acknowledgement
    pub fn ack(&mut self, ack: Acknowledgement) {
        self.events.push(OutboundEvent::Ack(ack));
    }

    /// Queue a byte for the host serial stream
    pub fn serial_byte(&mut self, byte: u8) {
        self.serial_out.push(byte);
    }

    /// Take all queued events, oldest first
    pub fn drain_events(&mut self) -> Vec<OutboundEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take all queued serial bytes, oldest first
    pub fn drain_serial(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.serial_out)
    }

    /// Number of queued events
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

/// Duplicate of a numeric pin report under its `"D"`-prefixed name
#[cfg(feature = "legacy-pin-alias")]
fn legacy_alias(event: &PinStateEvent) -> Option<PinStateEvent> {
    if event.pin.is_empty() || !event.pin.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(PinStateEvent {
        pin: format!("{}{}", crate::pin_map::LEGACY_DIGITAL_PREFIX, event.pin),
        deprecated: true,
        ..event.clone()
    })
}
