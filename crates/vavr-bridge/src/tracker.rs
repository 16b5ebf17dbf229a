//! Port change tracking
//!
//! Turns raw port snapshots into per-pin edges. Every level change updates
//! the pin's high-time bookkeeping (used later for duty-cycle estimation),
//! and pins listening in digital mode get an immediate report.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::trace;
use vavr_protocol::PinStateEvent;

use crate::emulator::cpu_time;
use crate::events::Outbox;
use crate::pin_map::{PinMap, PinMapping, PortId};

/// What is published for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningMode {
    /// Every edge, immediately
    Digital,
    /// Duty-cycle estimate, on the publish interval
    Analog,
}

/// Runtime bookkeeping for one pin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinRuntimeState {
    /// Level seen at the last change (`None` until first observation)
    pub last_level: Option<bool>,
    /// Cycle of the last level change
    pub last_level_change_at_cycle: u64,
    /// Cycles spent high since the last window reset
    pub high_cycles_accumulated: u64,
    /// Cycle at which the current publish window started
    pub last_window_reset_at_cycle: u64,
    /// Last duty-cycle value sent to subscribers
    pub last_published_analog_value: Option<u8>,
    /// Current listening mode
    pub listening_mode: Option<ListeningMode>,
}

impl PinRuntimeState {
    fn observed(level: bool, cycle: u64) -> Self {
        Self {
            last_level: Some(level),
            last_level_change_at_cycle: cycle,
            last_window_reset_at_cycle: cycle,
            ..Self::default()
        }
    }

    /// Record a sampled level; returns `true` if it was an edge
    fn record(&mut self, level: bool, cycle: u64) -> bool {
        match self.last_level {
            None => {
                self.last_level = Some(level);
                self.last_level_change_at_cycle = cycle;
                self.last_window_reset_at_cycle = cycle;
                false
            }
            Some(previous) if previous == level => false,
            Some(previous) => {
                if previous {
                    self.high_cycles_accumulated +=
                        cycle.saturating_sub(self.last_level_change_at_cycle);
                }
                self.last_level = Some(level);
                self.last_level_change_at_cycle = cycle;
                true
            }
        }
    }
}

/// Per-pin edge detector
#[derive(Debug, Default)]
pub struct PortChangeTracker {
    pins: HashMap<String, PinRuntimeState>,
}

impl PortChangeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a port-changed notification
    pub fn on_port_change(
        &mut self,
        map: &PinMap,
        port: PortId,
        levels: u8,
        cycle: u64,
        clock_hz: u32,
        outbox: &mut Outbox,
    ) {
        for mapping in map.pins_of_port(port) {
            let level = levels & mapping.mask() != 0;
            let state = self.pins.entry(mapping.pin_id.clone()).or_default();

            if !state.record(level, cycle) {
                continue;
            }

            trace!(pin = %mapping.pin_id, level, cycle, "edge");
            if state.listening_mode == Some(ListeningMode::Digital) {
                outbox.pin_state(PinStateEvent::digital(
                    mapping.pin_id.clone(),
                    level,
                    cpu_time(cycle, clock_hz),
                ));
            }
        }
    }

    /// Change a pin's listening mode
    ///
    /// `current_level` is the pin's level right now. It seeds the pin's state
    /// if it was never observed, and it is reported immediately when the pin
    /// switches into digital mode. A pin that was observed is first brought up
    /// to `current_level`, so a later port notification of the same level is
    /// not reported again. Window counters are not reset.
    pub fn set_mode(
        &mut self,
        mapping: &PinMapping,
        mode: Option<ListeningMode>,
        current_level: bool,
        cycle: u64,
        clock_hz: u32,
        outbox: &mut Outbox,
    ) {
        let state = match self.pins.entry(mapping.pin_id.clone()) {
            Entry::Occupied(entry) => {
                let state = entry.into_mut();
                state.record(current_level, cycle);
                state
            }
            Entry::Vacant(entry) => entry.insert(PinRuntimeState::observed(current_level, cycle)),
        };
        state.listening_mode = mode;

        if mode == Some(ListeningMode::Digital) {
            outbox.pin_state(PinStateEvent::digital(
                mapping.pin_id.clone(),
                current_level,
                cpu_time(cycle, clock_hz),
            ));
        }
    }

    /// State of a pin, if it has been observed
    pub fn state(&self, pin: &str) -> Option<&PinRuntimeState> {
        self.pins.get(pin)
    }

    /// Mutable state of a pin, if it has been observed
    pub fn state_mut(&mut self, pin: &str) -> Option<&mut PinRuntimeState> {
        self.pins.get_mut(pin)
    }

    /// Listening modes of all pins that have one
    pub fn listening_modes(&self) -> Vec<(String, ListeningMode)> {
        let mut modes: Vec<_> = self
            .pins
            .iter()
            .filter_map(|(pin, state)| state.listening_mode.map(|m| (pin.clone(), m)))
            .collect();
        modes.sort();
        modes
    }
}
