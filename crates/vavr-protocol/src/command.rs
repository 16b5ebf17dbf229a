//! Inbound control commands
//!
//! Every inbound WebSocket message is validated into a [`Command`] before it
//! is queued. The original JSON object is kept in the [`Envelope`] so that an
//! acknowledgement can echo it back verbatim.

use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Largest value accepted for an analog input injection (10-bit ADC range)
pub const ANALOG_INPUT_MAX: u16 = 1023;

/// Requested reporting mode for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinReportMode {
    /// Publish every level transition immediately
    Digital,
    /// Publish an estimated duty cycle on the publish interval
    Analog,
    /// Alias for [`PinReportMode::Analog`]
    Pwm,
    /// Stop publishing (`none` or any unrecognised mode name)
    Off,
}

impl PinReportMode {
    /// Parse a mode name; unrecognised names map to [`PinReportMode::Off`]
    pub fn from_name(name: &str) -> Self {
        match name {
            "digital" => Self::Digital,
            "analog" => Self::Analog,
            "pwm" => Self::Pwm,
            _ => Self::Off,
        }
    }

    /// Whether this mode publishes duty-cycle estimates
    pub fn is_analog(&self) -> bool {
        matches!(self, Self::Analog | Self::Pwm)
    }
}

/// Value carried by a `pinState` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum PinValue {
    /// Logic level
    Digital(bool),
    /// Analog reading (10-bit inbound, 8-bit duty cycle outbound)
    Analog(u16),
}

/// Simulation control actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Resume instruction stepping
    Play,
    /// Suspend instruction stepping
    Pause,
    /// Resume instruction stepping (same as [`ControlAction::Play`])
    Unpause,
    /// Unrecognised action name
    Other(String),
}

impl ControlAction {
    /// Parse an action name
    pub fn from_name(name: &str) -> Self {
        match name {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "unpause" => Self::Unpause,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A validated inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `pinMode`: change what is published for a pin
    PinMode {
        /// Pin identifier as sent by the client
        pin: String,
        /// Requested mode
        mode: PinReportMode,
    },

    /// `pinState` / `fakePinState`: drive a pin from outside
    PinState {
        /// Pin identifier as sent by the client
        pin: String,
        /// Level or analog reading to apply
        state: PinValue,
    },

    /// `control`: pause or resume the simulation
    Control {
        /// Requested action
        action: ControlAction,
    },

    /// `serialDebug`: mirror serial traffic as events
    SerialDebug {
        /// Whether mirroring is enabled
        enabled: bool,
    },

    /// Any other message type, kept so newer clients do not break dispatch
    Unknown {
        /// The message's `type` value
        kind: String,
    },
}

impl Command {
    /// Wire name of this command's type
    pub fn kind(&self) -> &str {
        match self {
            Command::PinMode { .. } => "pinMode",
            Command::PinState { .. } => "pinState",
            Command::Control { .. } => "control",
            Command::SerialDebug { .. } => "serialDebug",
            Command::Unknown { kind } => kind,
        }
    }

    fn from_object(kind: &str, object: &Map<String, Value>) -> Result<Self, ProtocolError> {
        match kind {
            "pinMode" => Ok(Command::PinMode {
                pin: pin_field(kind, object)?,
                // A missing or non-string mode clears the pin's mode
                mode: object
                    .get("mode")
                    .and_then(Value::as_str)
                    .map_or(PinReportMode::Off, PinReportMode::from_name),
            }),
            "pinState" | "fakePinState" => Ok(Command::PinState {
                pin: pin_field(kind, object)?,
                state: pin_value_field(kind, object)?,
            }),
            "control" => Ok(Command::Control {
                action: ControlAction::from_name(&string_field(kind, object, "action")?),
            }),
            "serialDebug" => match object.get("state") {
                Some(Value::Bool(enabled)) => Ok(Command::SerialDebug { enabled: *enabled }),
                Some(_) => Err(invalid(kind, "state", "expected a boolean")),
                None => Err(ProtocolError::MissingField {
                    kind: kind.to_string(),
                    field: "state",
                }),
            },
            other => Ok(Command::Unknown {
                kind: other.to_string(),
            }),
        }
    }
}

/// A command together with its correlation token and original payload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The validated command
    pub command: Command,
    /// Correlation token (`replyId`), echoed in the acknowledgement
    pub reply_id: Option<Value>,
    /// The message exactly as received
    pub raw: Map<String, Value>,
}

impl Envelope {
    /// Wrap an already-built command, synthesising its raw form
    pub fn new(command: Command) -> Self {
        let mut raw = Map::new();
        raw.insert("type".to_string(), Value::String(command.kind().to_string()));
        Self {
            command,
            reply_id: None,
            raw,
        }
    }

    /// Attach a correlation token
    pub fn with_reply_id(mut self, reply_id: impl Into<Value>) -> Self {
        let reply_id = reply_id.into();
        self.raw.insert("replyId".to_string(), reply_id.clone());
        self.reply_id = Some(reply_id);
        self
    }

    /// Parse and validate a JSON text message
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON value
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(raw) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let kind = match raw.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        let command = Command::from_object(&kind, &raw)?;
        let reply_id = raw.get("replyId").filter(|v| !v.is_null()).cloned();

        Ok(Self {
            command,
            reply_id,
            raw,
        })
    }
}

/// Pin identifiers may be sent as strings (`"13"`, `"A0"`) or bare numbers (`13`)
fn pin_field(kind: &str, object: &Map<String, Value>) -> Result<String, ProtocolError> {
    match object.get("pin") {
        Some(Value::String(pin)) => Ok(pin.clone()),
        Some(Value::Number(n)) if n.is_u64() => Ok(n.to_string()),
        Some(_) => Err(invalid(kind, "pin", "expected a string or pin number")),
        None => Err(ProtocolError::MissingField {
            kind: kind.to_string(),
            field: "pin",
        }),
    }
}

fn string_field(
    kind: &str,
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    match object.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid(kind, field, "expected a string")),
        None => Err(ProtocolError::MissingField {
            kind: kind.to_string(),
            field,
        }),
    }
}

fn pin_value_field(kind: &str, object: &Map<String, Value>) -> Result<PinValue, ProtocolError> {
    match object.get("state") {
        Some(Value::Bool(level)) => Ok(PinValue::Digital(*level)),
        Some(Value::Number(n)) => {
            let reading = n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| invalid(kind, "state", "expected a non-negative integer"))?;
            if reading > u64::from(ANALOG_INPUT_MAX) {
                return Err(invalid(
                    kind,
                    "state",
                    &format!("{} exceeds {}", reading, ANALOG_INPUT_MAX),
                ));
            }
            Ok(PinValue::Analog(reading as u16))
        }
        Some(_) => Err(invalid(kind, "state", "expected a boolean or number")),
        None => Err(ProtocolError::MissingField {
            kind: kind.to_string(),
            field: "state",
        }),
    }
}

fn invalid(kind: &str, field: &'static str, reason: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        kind: kind.to_string(),
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pin_mode() {
        let env = Envelope::from_json(r#"{"type":"pinMode","pin":"13","mode":"digital"}"#).unwrap();
        assert_eq!(
            env.command,
            Command::PinMode {
                pin: "13".to_string(),
                mode: PinReportMode::Digital
            }
        );
        assert!(env.reply_id.is_none());
    }

    #[test]
    fn test_pin_mode_names() {
        assert_eq!(PinReportMode::from_name("analog"), PinReportMode::Analog);
        assert_eq!(PinReportMode::from_name("pwm"), PinReportMode::Pwm);
        assert_eq!(PinReportMode::from_name("none"), PinReportMode::Off);
        assert_eq!(PinReportMode::from_name("DIGITAL"), PinReportMode::Off);
        assert!(PinReportMode::Pwm.is_analog());
        assert!(!PinReportMode::Digital.is_analog());
    }

    #[test]
    fn test_pin_mode_without_usable_mode_clears() {
        for text in [
            r#"{"type":"pinMode","pin":"13"}"#,
            r#"{"type":"pinMode","pin":"13","mode":null}"#,
            r#"{"type":"pinMode","pin":"13","mode":1,"replyId":"m"}"#,
        ] {
            let env = Envelope::from_json(text).unwrap();
            assert_eq!(
                env.command,
                Command::PinMode {
                    pin: "13".to_string(),
                    mode: PinReportMode::Off
                }
            );
        }
    }

    #[test]
    fn test_numeric_pin_identifier() {
        let env = Envelope::from_json(r#"{"type":"pinMode","pin":12,"mode":"analog"}"#).unwrap();
        assert!(matches!(env.command, Command::PinMode { ref pin, .. } if pin == "12"));
    }

    #[test]
    fn test_fake_pin_state_is_pin_state() {
        let a = Envelope::from_json(r#"{"type":"fakePinState","pin":"A0","state":512}"#).unwrap();
        let b = Envelope::from_json(r#"{"type":"pinState","pin":"A0","state":512}"#).unwrap();
        assert_eq!(a.command, b.command);
        assert_eq!(
            a.command,
            Command::PinState {
                pin: "A0".to_string(),
                state: PinValue::Analog(512)
            }
        );
    }

    #[test]
    fn test_boolean_pin_state() {
        let env = Envelope::from_json(r#"{"type":"pinState","pin":"2","state":true}"#).unwrap();
        assert!(matches!(
            env.command,
            Command::PinState {
                state: PinValue::Digital(true),
                ..
            }
        ));
    }

    #[test]
    fn test_integral_float_reading_accepted() {
        let env = Envelope::from_json(r#"{"type":"pinState","pin":"A1","state":42.0}"#).unwrap();
        assert!(matches!(
            env.command,
            Command::PinState {
                state: PinValue::Analog(42),
                ..
            }
        ));
    }

    #[test]
    fn test_analog_reading_out_of_range() {
        let err = Envelope::from_json(r#"{"type":"pinState","pin":"A1","state":1024}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "state", .. }));

        let err = Envelope::from_json(r#"{"type":"pinState","pin":"A1","state":-3}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "state", .. }));
    }

    #[test]
    fn test_control_actions() {
        for (name, action) in [
            ("play", ControlAction::Play),
            ("pause", ControlAction::Pause),
            ("unpause", ControlAction::Unpause),
            ("rewind", ControlAction::Other("rewind".to_string())),
        ] {
            let text = format!(r#"{{"type":"control","action":"{}"}}"#, name);
            let env = Envelope::from_json(&text).unwrap();
            assert_eq!(env.command, Command::Control { action });
        }
    }

    #[test]
    fn test_serial_debug() {
        let env = Envelope::from_json(r#"{"type":"serialDebug","state":true}"#).unwrap();
        assert_eq!(env.command, Command::SerialDebug { enabled: true });

        let err = Envelope::from_json(r#"{"type":"serialDebug","state":"yes"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { .. }));
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let env = Envelope::from_json(r#"{"type":"reset","replyId":"x"}"#).unwrap();
        assert_eq!(
            env.command,
            Command::Unknown {
                kind: "reset".to_string()
            }
        );
        assert_eq!(env.command.kind(), "reset");
        assert_eq!(env.reply_id, Some(Value::String("x".to_string())));
    }

    #[test]
    fn test_reply_id_kept_with_raw() {
        let env = Envelope::from_json(
            r#"{"type":"pinMode","pin":"13","mode":"digital","replyId":"abc","extra":1}"#,
        )
        .unwrap();
        assert_eq!(env.reply_id, Some(Value::String("abc".to_string())));
        assert_eq!(env.raw.get("extra"), Some(&Value::from(1)));
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(
            Envelope::from_json("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(Envelope::from_json("[1,2]"), Err(ProtocolError::NotAnObject));
        assert_eq!(
            Envelope::from_json(r#"{"pin":"13"}"#),
            Err(ProtocolError::MissingType)
        );
        assert!(matches!(
            Envelope::from_json(r#"{"type":"pinMode","mode":"digital"}"#),
            Err(ProtocolError::MissingField { field: "pin", .. })
        ));
        assert!(matches!(
            Envelope::from_json(r#"{"type":"control"}"#),
            Err(ProtocolError::MissingField {
                field: "action",
                ..
            })
        ));
    }

    #[test]
    fn test_envelope_builder() {
        let env = Envelope::new(Command::SerialDebug { enabled: false }).with_reply_id("r1");
        assert_eq!(env.raw.get("type"), Some(&Value::from("serialDebug")));
        assert_eq!(env.raw.get("replyId"), Some(&Value::from("r1")));
        assert_eq!(env.reply_id, Some(Value::from("r1")));
    }
}
