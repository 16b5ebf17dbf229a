//! Analog publish scheduler
//!
//! Pins in analog mode are not reported per edge. Instead the high time
//! recorded by the [`PortChangeTracker`](crate::tracker::PortChangeTracker)
//! is turned into a 0..=255 duty-cycle estimate on a wall-clock cadence, so
//! the rate seen by subscribers does not depend on how fast the host steps
//! the emulator.

use std::time::{Duration, Instant};

use tracing::trace;
use vavr_protocol::PinStateEvent;

use crate::emulator::cpu_time;
use crate::events::Outbox;
use crate::pin_map::PinMap;
use crate::tracker::{ListeningMode, PinRuntimeState, PortChangeTracker};

/// Scale a high-time fraction to `0..=255`
pub fn duty_cycle(high_cycles: u64, window_cycles: u64) -> u8 {
    if window_cycles == 0 {
        return 0;
    }
    let ratio = high_cycles as f64 / window_cycles as f64;
    (ratio * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Wall-clock gate plus the per-window duty-cycle computation
#[derive(Debug, Clone)]
pub struct PublishScheduler {
    interval: Duration,
    min_diff: u8,
    last_publish: Option<Instant>,
}

impl PublishScheduler {
    /// Create a scheduler
    ///
    /// A value is only republished when it differs from the last published
    /// one by more than `min_diff`.
    pub fn new(interval: Duration, min_diff: u8) -> Self {
        Self {
            interval,
            min_diff,
            last_publish: None,
        }
    }

    /// Whether a publish window has elapsed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_publish {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Configured publish interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Close the current window for every analog pin
    pub fn publish(
        &mut self,
        now: Instant,
        map: &PinMap,
        tracker: &mut PortChangeTracker,
        cycle: u64,
        clock_hz: u32,
        outbox: &mut Outbox,
    ) {
        self.last_publish = Some(now);

        for mapping in map.iter() {
            let Some(state) = tracker.state_mut(&mapping.pin_id) else {
                continue;
            };
            if state.listening_mode != Some(ListeningMode::Analog) {
                continue;
            }
            if let Some(value) = self.close_window(state, cycle) {
                trace!(pin = %mapping.pin_id, value, "duty cycle");
                outbox.pin_state(PinStateEvent::analog(
                    mapping.pin_id.clone(),
                    value,
                    cpu_time(cycle, clock_hz),
                ));
            }
        }
    }

    /// Compute the window's duty cycle and reset it; returns the value to
    /// publish, if any
    fn close_window(&self, state: &mut PinRuntimeState, cycle: u64) -> Option<u8> {
        let window = cycle.saturating_sub(state.last_window_reset_at_cycle);
        if window == 0 {
            return None;
        }

        // Count the still-open high interval, and move its start so the next
        // falling edge only adds what comes after this window
        if state.last_level == Some(true) {
            state.high_cycles_accumulated +=
                cycle.saturating_sub(state.last_level_change_at_cycle);
            state.last_level_change_at_cycle = cycle;
        }

        let value = duty_cycle(state.high_cycles_accumulated, window);
        let publish = match state.last_published_analog_value {
            None => true,
            Some(last) => value.abs_diff(last) > self.min_diff,
        };

        state.high_cycles_accumulated = 0;
        state.last_window_reset_at_cycle = cycle;

        if publish {
            state.last_published_analog_value = Some(value);
            Some(value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin_map::PortId;
    use vavr_protocol::PinValue;

    const CLOCK: u32 = 16_000_000;

    fn analog_pin(tracker: &mut PortChangeTracker, map: &PinMap, pin: &str, outbox: &mut Outbox) {
        let mapping = map.lookup(pin).unwrap().clone();
        tracker.set_mode(&mapping, Some(ListeningMode::Analog), false, 0, CLOCK, outbox);
    }

    fn values(outbox: &mut Outbox) -> Vec<u16> {
        outbox
            .drain_events()
            .iter()
            .filter_map(|e| e.as_pin_state())
            .map(|p| match p.state {
                PinValue::Analog(v) => v,
                PinValue::Digital(_) => panic!("unexpected digital report"),
            })
            .collect()
    }

    #[test]
    fn test_duty_cycle() {
        assert_eq!(duty_cycle(0, 100), 0);
        assert_eq!(duty_cycle(100, 100), 255);
        assert_eq!(duty_cycle(50, 100), 128);
        assert_eq!(duty_cycle(25, 100), 64);
        assert_eq!(duty_cycle(200, 100), 255);
        assert_eq!(duty_cycle(10, 0), 0);
    }

    #[test]
    fn test_gate() {
        let start = Instant::now();
        let mut scheduler = PublishScheduler::new(Duration::from_millis(250), 0);
        let map = PinMap::uno();
        let mut tracker = PortChangeTracker::new();
        let mut outbox = Outbox::new();

        assert!(scheduler.is_due(start));
        scheduler.publish(start, &map, &mut tracker, 0, CLOCK, &mut outbox);
        assert!(!scheduler.is_due(start + Duration::from_millis(100)));
        assert!(scheduler.is_due(start + Duration::from_millis(250)));
    }

    #[test]
    fn test_half_duty() {
        let now = Instant::now();
        let map = PinMap::uno();
        let mut scheduler = PublishScheduler::new(Duration::from_millis(250), 0);
        let mut tracker = PortChangeTracker::new();
        let mut outbox = Outbox::new();
        analog_pin(&mut tracker, &map, "9", &mut outbox);

        // 50% duty on pin 9 (B1) with a period of 100 cycles
        for period in 0..10u64 {
            let base = period * 100;
            tracker.on_port_change(&map, PortId::B, 0b10, base + 1, CLOCK, &mut outbox);
            tracker.on_port_change(&map, PortId::B, 0b00, base + 51, CLOCK, &mut outbox);
        }
        scheduler.publish(now, &map, &mut tracker, 1000, CLOCK, &mut outbox);

        assert_eq!(values(&mut outbox), vec![128]);
        let state = tracker.state("9").unwrap();
        assert_eq!(state.high_cycles_accumulated, 0);
        assert_eq!(state.last_window_reset_at_cycle, 1000);
    }

    #[test]
    fn test_constant_high_closes_open_interval() {
        let now = Instant::now();
        let map = PinMap::uno();
        let mut scheduler = PublishScheduler::new(Duration::ZERO, 0);
        let mut tracker = PortChangeTracker::new();
        let mut outbox = Outbox::new();
        analog_pin(&mut tracker, &map, "9", &mut outbox);

        tracker.on_port_change(&map, PortId::B, 0b10, 0, CLOCK, &mut outbox);
        scheduler.publish(now, &map, &mut tracker, 1000, CLOCK, &mut outbox);
        scheduler.publish(now, &map, &mut tracker, 2000, CLOCK, &mut outbox);
        assert_eq!(values(&mut outbox), vec![255]);

        // Falling edge must only count the part after the last window
        tracker.on_port_change(&map, PortId::B, 0b00, 2500, CLOCK, &mut outbox);
        assert_eq!(tracker.state("9").unwrap().high_cycles_accumulated, 500);
        scheduler.publish(now, &map, &mut tracker, 3000, CLOCK, &mut outbox);
        assert_eq!(values(&mut outbox), vec![128]);
    }

    #[test]
    fn test_empty_window_is_skipped() {
        let now = Instant::now();
        let map = PinMap::uno();
        let mut scheduler = PublishScheduler::new(Duration::ZERO, 0);
        let mut tracker = PortChangeTracker::new();
        let mut outbox = Outbox::new();
        analog_pin(&mut tracker, &map, "9", &mut outbox);

        scheduler.publish(now, &map, &mut tracker, 0, CLOCK, &mut outbox);
        assert_eq!(outbox.pending_events(), 0);
        assert_eq!(tracker.state("9").unwrap().last_published_analog_value, None);
    }

    #[test]
    fn test_min_diff_suppresses_small_changes() {
        let now = Instant::now();
        let map = PinMap::uno();
        let mut scheduler = PublishScheduler::new(Duration::ZERO, 10);
        let mut tracker = PortChangeTracker::new();
        let mut outbox = Outbox::new();
        analog_pin(&mut tracker, &map, "9", &mut outbox);

        // First value is always published
        scheduler.publish(now, &map, &mut tracker, 100, CLOCK, &mut outbox);
        assert_eq!(values(&mut outbox), vec![0]);

        // 4% high: 10 < threshold, suppressed but window still reset
        tracker.on_port_change(&map, PortId::B, 0b10, 100, CLOCK, &mut outbox);
        tracker.on_port_change(&map, PortId::B, 0b00, 104, CLOCK, &mut outbox);
        scheduler.publish(now, &map, &mut tracker, 200, CLOCK, &mut outbox);
        assert!(values(&mut outbox).is_empty());
        assert_eq!(tracker.state("9").unwrap().last_window_reset_at_cycle, 200);

        // 20% high: 51 > threshold
        tracker.on_port_change(&map, PortId::B, 0b10, 200, CLOCK, &mut outbox);
        tracker.on_port_change(&map, PortId::B, 0b00, 220, CLOCK, &mut outbox);
        scheduler.publish(now, &map, &mut tracker, 300, CLOCK, &mut outbox);
        assert_eq!(values(&mut outbox), vec![51]);
    }

    #[test]
    fn test_digital_pins_are_not_sampled() {
        let now = Instant::now();
        let map = PinMap::uno();
        let mut scheduler = PublishScheduler::new(Duration::ZERO, 0);
        let mut tracker = PortChangeTracker::new();
        let mut outbox = Outbox::new();

        tracker.on_port_change(&map, PortId::B, 0b10, 0, CLOCK, &mut outbox);
        scheduler.publish(now, &map, &mut tracker, 1000, CLOCK, &mut outbox);
        assert_eq!(outbox.pending_events(), 0);
        assert_eq!(tracker.state("9").unwrap().last_window_reset_at_cycle, 0);
    }
}
