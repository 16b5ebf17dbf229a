//! Outbound events published to WebSocket subscribers

use serde::Serialize;
use serde_json::{Map, Value};

use crate::command::{Envelope, PinValue};

/// Direction of a mirrored serial transfer, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SerialDirection {
    /// Bytes sent by the simulated MCU
    #[serde(rename = "TX")]
    Tx,
    /// Bytes received by the simulated MCU
    #[serde(rename = "RX")]
    Rx,
}

/// A pin level or duty-cycle report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "pinState", rename_all = "camelCase")]
pub struct PinStateEvent {
    /// Pin identifier
    pub pin: String,
    /// `true`/`false` for digital pins, `0..=255` for analog pins
    pub state: PinValue,
    /// Emulated time of the observation in seconds
    pub cpu_time: f64,
    /// Set on the legacy `"D"`-prefixed duplicate
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl PinStateEvent {
    /// Create a digital level report
    pub fn digital(pin: impl Into<String>, level: bool, cpu_time: f64) -> Self {
        Self {
            pin: pin.into(),
            state: PinValue::Digital(level),
            cpu_time,
            deprecated: false,
        }
    }

    /// Create a duty-cycle report
    pub fn analog(pin: impl Into<String>, value: u8, cpu_time: f64) -> Self {
        Self {
            pin: pin.into(),
            state: PinValue::Analog(u16::from(value)),
            cpu_time,
            deprecated: false,
        }
    }
}

/// Mirrored serial traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "serialDebug")]
pub struct SerialDebugEvent {
    /// Transfer direction
    pub direction: SerialDirection,
    /// Raw bytes
    pub bytes: Vec<u8>,
}

/// Echo of a command that carried a `replyId`
///
/// Serialises as the original message plus `"executed": true`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Acknowledgement(Map<String, Value>);

impl Acknowledgement {
    /// Build the acknowledgement for a dispatched command
    pub fn for_envelope(envelope: &Envelope) -> Self {
        let mut echo = envelope.raw.clone();
        echo.insert("executed".to_string(), Value::Bool(true));
        Self(echo)
    }

    /// The correlation token being acknowledged
    pub fn reply_id(&self) -> Option<&Value> {
        self.0.get("replyId")
    }

    /// The echoed message object
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Everything the bridge publishes to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    /// Pin level / duty cycle
    PinState(PinStateEvent),
    /// Serial traffic mirror
    SerialDebug(SerialDebugEvent),
    /// Command acknowledgement
    Ack(Acknowledgement),
}

impl OutboundEvent {
    /// Encode as a JSON text frame
    pub fn to_json(&self) -> String {
        // Maps, strings, bools and finite numbers only; serialisation cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// The pin state payload, if this is a pin report
    pub fn as_pin_state(&self) -> Option<&PinStateEvent> {
        match self {
            OutboundEvent::PinState(event) => Some(event),
            _ => None,
        }
    }

    /// The acknowledgement payload, if this is an ack
    pub fn as_ack(&self) -> Option<&Acknowledgement> {
        match self {
            OutboundEvent::Ack(ack) => Some(ack),
            _ => None,
        }
    }
}

impl From<PinStateEvent> for OutboundEvent {
    fn from(event: PinStateEvent) -> Self {
        OutboundEvent::PinState(event)
    }
}

impl From<SerialDebugEvent> for OutboundEvent {
    fn from(event: SerialDebugEvent) -> Self {
        OutboundEvent::SerialDebug(event)
    }
}

impl From<Acknowledgement> for OutboundEvent {
    fn from(ack: Acknowledgement) -> Self {
        OutboundEvent::Ack(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_value(event: impl Into<OutboundEvent>) -> Value {
        serde_json::from_str(&event.into().to_json()).unwrap()
    }

    #[test]
    fn test_digital_pin_state_shape() {
        let v = as_value(PinStateEvent::digital("13", true, 0.5));
        assert_eq!(
            v,
            json!({"type": "pinState", "pin": "13", "state": true, "cpuTime": 0.5})
        );
    }

    #[test]
    fn test_analog_pin_state_shape() {
        let v = as_value(PinStateEvent::analog("9", 128, 1.25));
        assert_eq!(
            v,
            json!({"type": "pinState", "pin": "9", "state": 128, "cpuTime": 1.25})
        );
    }

    #[test]
    fn test_deprecated_flag_only_when_set() {
        let mut event = PinStateEvent::digital("D13", false, 0.0);
        event.deprecated = true;
        let v = as_value(event);
        assert_eq!(v["deprecated"], json!(true));
    }

    #[test]
    fn test_serial_debug_shape() {
        let v = as_value(SerialDebugEvent {
            direction: SerialDirection::Tx,
            bytes: vec![0x48, 0x69],
        });
        assert_eq!(
            v,
            json!({"type": "serialDebug", "direction": "TX", "bytes": [72, 105]})
        );
    }

    #[test]
    fn test_ack_echoes_original() {
        let envelope =
            Envelope::from_json(r#"{"type":"control","action":"pause","replyId":"abc"}"#).unwrap();
        let ack = Acknowledgement::for_envelope(&envelope);
        assert_eq!(ack.reply_id(), Some(&json!("abc")));
        assert_eq!(
            as_value(ack),
            json!({"type": "control", "action": "pause", "replyId": "abc", "executed": true})
        );
    }
}
