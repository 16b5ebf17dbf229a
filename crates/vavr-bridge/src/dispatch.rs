//! Command dispatch
//!
//! Applies drained commands to the session. Runs only at the tick boundary,
//! never while the emulator is mid-batch.

use tracing::debug;
use vavr_protocol::{Acknowledgement, Command, ControlAction, Envelope, PinReportMode, PinValue};

use crate::emulator::Emulator;
use crate::error::DispatchError;
use crate::session::{Hooks, RunState, Session};
use crate::tracker::ListeningMode;

/// Volts per ADC step, for a 5 V reference and a 10-bit converter
const VOLTS_PER_STEP: f64 = 5.0 / 1024.0;

impl<E: Emulator> Session<E> {
    /// Apply one command and acknowledge it if it carries a `replyId`
    ///
    /// The acknowledgement is emitted after the command's own events, and
    /// also when the command failed (the failure is returned for logging).
    pub(crate) fn dispatch(&mut self, envelope: &Envelope) -> Result<(), DispatchError> {
        let result = self.apply(&envelope.command);
        if envelope.reply_id.is_some() {
            self.hooks
                .outbox
                .ack(Acknowledgement::for_envelope(envelope));
        }
        result
    }

    fn apply(&mut self, command: &Command) -> Result<(), DispatchError> {
        match command {
            Command::PinMode { pin, mode } => {
                self.set_pin_mode(pin, *mode);
                Ok(())
            }
            Command::PinState {
                pin,
                state: PinValue::Digital(level),
            } => {
                if let Some(mapping) = self.hooks.pin_map.lookup(pin) {
                    self.emulator.set_pin(mapping.port, mapping.bit, *level);
                } else {
                    debug!(pin = %pin, "pinState for unknown pin");
                }
                Ok(())
            }
            Command::PinState {
                pin,
                state: PinValue::Analog(value),
            } => {
                let Some(channel) = self
                    .hooks
                    .pin_map
                    .lookup(pin)
                    .and_then(|m| m.analog_channel)
                else {
                    debug!(pin = %pin, "analog pinState for pin without ADC channel");
                    return Ok(());
                };
                let volts = f64::from(*value) * VOLTS_PER_STEP;
                self.emulator
                    .set_analog_input(channel, volts)
                    .map_err(|source| DispatchError::Emulator {
                        command: command.kind().to_string(),
                        pin: pin.clone(),
                        source,
                    })
            }
            Command::Control { action } => {
                self.control(action);
                Ok(())
            }
            Command::SerialDebug { enabled } => {
                debug!(enabled, "serial debug");
                self.hooks.serial.set_debug(*enabled);
                Ok(())
            }
            Command::Unknown { kind } => {
                debug!(kind = %kind, "ignoring unknown command");
                Ok(())
            }
        }
    }

    fn set_pin_mode(&mut self, pin: &str, mode: PinReportMode) {
        let Hooks {
            pin_map,
            tracker,
            outbox,
            clock_hz,
            ..
        } = &mut self.hooks;
        let Some(mapping) = pin_map.lookup(pin) else {
            debug!(pin = %pin, "pinMode for unknown pin");
            return;
        };

        let listening = match mode {
            PinReportMode::Digital => Some(ListeningMode::Digital),
            PinReportMode::Analog | PinReportMode::Pwm => Some(ListeningMode::Analog),
            PinReportMode::Off => None,
        };
        let level = self.emulator.pin_level(mapping.port, mapping.bit);
        debug!(pin = %mapping.pin_id, ?listening, "pin mode");
        tracker.set_mode(
            mapping,
            listening,
            level,
            self.emulator.cycles(),
            *clock_hz,
            outbox,
        );
    }

    fn control(&mut self, action: &ControlAction) {
        let next = match action {
            ControlAction::Pause => RunState::Paused,
            ControlAction::Play | ControlAction::Unpause => RunState::Running,
            ControlAction::Other(name) => {
                debug!(action = %name, "ignoring unknown control action");
                return;
            }
        };
        if self.state != RunState::Stopped && self.state != next {
            debug!(from = ?self.state, to = ?next, "run state");
            self.state = next;
        }
    }
}
