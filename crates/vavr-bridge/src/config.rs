//! Session tuning knobs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration of a simulation session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Instructions executed per run-loop tick
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Wall-clock interval between analog publishes, in milliseconds
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    /// Analog values are republished only when they move by more than this
    #[serde(default)]
    pub min_diff_to_publish: u8,
    /// Start in the paused state
    #[serde(default)]
    pub pause_on_start: bool,
    /// Mirror serial traffic as events from the start
    #[serde(default)]
    pub serial_debug: bool,
}

fn default_batch_size() -> u32 {
    500_000
}

fn default_publish_interval_ms() -> u64 {
    250
}

impl BridgeConfig {
    /// Publish interval as a [`Duration`]
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            publish_interval_ms: default_publish_interval_ms(),
            min_diff_to_publish: 0,
            pause_on_start: false,
            serial_debug: false,
        }
    }
}
