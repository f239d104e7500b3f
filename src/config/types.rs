use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{AUTO_DISCONNECT_DELAY, SCAN_DEADLINE, SCAN_POLL_DELAY};
use crate::device::scanner::NameFilter;
use crate::device::types::DeviceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_timeout_ms: u64,
    pub scan_poll_interval_ms: u64,
    pub auto_disconnect_ms: u64,
    pub name_filter: NameFilter,
}

impl Config {
    /// Patterns are compared against lower-cased names, so store them that way.
    pub fn normalize(&mut self) {
        fn clean(patterns: &mut Vec<String>) {
            *patterns = patterns
                .iter()
                .map(|pattern| pattern.trim().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect();
        }

        clean(&mut self.name_filter.contains);
        clean(&mut self.name_filter.prefixes);
        self.scan_poll_interval_ms = self.scan_poll_interval_ms.max(1);
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            scan_poll_interval: Duration::from_millis(self.scan_poll_interval_ms),
            auto_disconnect: Duration::from_millis(self.auto_disconnect_ms),
            name_filter: self.name_filter.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_timeout_ms: SCAN_DEADLINE,
            scan_poll_interval_ms: SCAN_POLL_DELAY,
            auto_disconnect_ms: AUTO_DISCONNECT_DELAY,
            name_filter: NameFilter::default(),
        }
    }
}
