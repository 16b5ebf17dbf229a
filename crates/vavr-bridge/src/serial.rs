//! Serial byte relay
//!
//! Host bytes are buffered and handed to the emulated UART one at a time,
//! paced by the UART's ready signal. Bytes the UART finishes transmitting go
//! straight to the outbox in order.

use std::collections::VecDeque;

use vavr_protocol::{SerialDebugEvent, SerialDirection};

use crate::events::Outbox;

/// Full-duplex relay between the host byte stream and the emulated UART
#[derive(Debug, Default)]
pub struct SerialBridge {
    pending: VecDeque<u8>,
    sending: bool,
    debug: bool,
}

impl SerialBridge {
    /// Create an idle bridge
    pub fn new(debug: bool) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }

    /// Buffer bytes from the host
    pub fn feed(&mut self, bytes: &[u8], outbox: &mut Outbox) {
        if bytes.is_empty() {
            return;
        }
        if self.debug {
            outbox.serial_debug(SerialDebugEvent {
                direction: SerialDirection::Rx,
                bytes: bytes.to_vec(),
            });
        }
        self.pending.extend(bytes);
    }

    /// Byte to start sending now, if the UART is idle and data is waiting
    ///
    /// Marks the bridge as sending; the UART's ready signal continues from
    /// there via [`SerialBridge::on_ready`].
    pub fn start(&mut self) -> Option<u8> {
        if self.sending {
            return None;
        }
        let byte = self.pending.pop_front()?;
        self.sending = true;
        Some(byte)
    }

    /// The UART accepted the previous byte and can take another
    pub fn on_ready(&mut self) -> Option<u8> {
        let next = self.pending.pop_front();
        self.sending = next.is_some();
        next
    }

    /// The UART finished transmitting a byte
    pub fn on_transmitted(&mut self, byte: u8, outbox: &mut Outbox) {
        outbox.serial_byte(byte);
        if self.debug {
            outbox.serial_debug(SerialDebugEvent {
                direction: SerialDirection::Tx,
                bytes: vec![byte],
            });
        }
    }

    /// Enable or disable mirroring of serial traffic as events
    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    /// Whether serial traffic is mirrored
    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Whether a byte is currently in flight to the UART
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Bytes waiting for the UART
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vavr_protocol::OutboundEvent;

    #[test]
    fn test_one_byte_in_flight() {
        let mut bridge = SerialBridge::new(false);
        let mut outbox = Outbox::new();

        bridge.feed(b"abc", &mut outbox);
        assert_eq!(bridge.start(), Some(b'a'));
        assert!(bridge.is_sending());
        // Already sending: a second start must not skip ahead
        assert_eq!(bridge.start(), None);
        bridge.feed(b"d", &mut outbox);

        assert_eq!(bridge.on_ready(), Some(b'b'));
        assert_eq!(bridge.on_ready(), Some(b'c'));
        assert_eq!(bridge.on_ready(), Some(b'd'));
        assert_eq!(bridge.on_ready(), None);
        assert!(!bridge.is_sending());
        assert_eq!(bridge.start(), None);
        assert_eq!(outbox.pending_events(), 0);
    }

    #[test]
    fn test_transmitted_bytes_reach_outbox() {
        let mut bridge = SerialBridge::new(false);
        let mut outbox = Outbox::new();

        for byte in b"ok\n" {
            bridge.on_transmitted(*byte, &mut outbox);
        }
        assert_eq!(outbox.drain_serial(), b"ok\n".to_vec());
    }

    #[test]
    fn test_debug_mirror() {
        let mut bridge = SerialBridge::new(false);
        let mut outbox = Outbox::new();
        bridge.set_debug(true);

        bridge.feed(b"hi", &mut outbox);
        bridge.on_transmitted(b'x', &mut outbox);

        let events = outbox.drain_events();
        assert_eq!(
            events,
            vec![
                OutboundEvent::SerialDebug(SerialDebugEvent {
                    direction: SerialDirection::Rx,
                    bytes: b"hi".to_vec(),
                }),
                OutboundEvent::SerialDebug(SerialDebugEvent {
                    direction: SerialDirection::Tx,
                    bytes: vec![b'x'],
                }),
            ]
        );
        // The tap does not alter the data path
        assert_eq!(outbox.drain_serial(), vec![b'x']);
        assert_eq!(bridge.pending(), 2);
    }
}
