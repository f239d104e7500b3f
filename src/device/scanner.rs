use std::sync::{Arc, Mutex};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{DEFAULT_NAME_CONTAINS, DEFAULT_NAME_PREFIXES};
use crate::device::transport::Transport;
use crate::device::types::{Advertisement, DeviceCandidate};
use crate::error::DeviceError;

/// Name heuristic for "this is probably a Kestrel". Best effort only: any device
/// can advertise a matching name, and renamed meters will be missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameFilter {
    pub contains: Vec<String>,
    pub prefixes: Vec<String>,
}

impl NameFilter {
    /// `name` is matched trimmed and lower-cased; patterns are expected in lower case.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return false;
        }

        self.contains.iter().any(|needle| name.contains(needle.as_str()))
            || self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        NameFilter {
            contains: DEFAULT_NAME_CONTAINS.iter().map(|s| s.to_string()).collect(),
            prefixes: DEFAULT_NAME_PREFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Found(DeviceCandidate),
    NotFound,
    /// Whoever cancelled the scan owns stopping it.
    Cancelled,
}

/// Scan until the first advertisement whose name passes `filter`, or until `max_duration`.
///
/// Unless `cancel` fires, the scan is stopped before returning; a failure to stop is only
/// logged. A cancelled scan returns at once and never calls `stop_scan`, so it can not stop
/// a scan started after it. Only a failure to start the scan is returned as an error.
pub async fn scan<T: Transport + ?Sized>(
    transport: &T,
    filter: &NameFilter,
    max_duration: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<ScanOutcome, DeviceError> {
    let latched: Arc<Mutex<Option<DeviceCandidate>>> = Arc::new(Mutex::new(None));

    let on_advertisement = {
        let latched = latched.clone();
        let filter = filter.clone();
        Box::new(move |advertisement: Advertisement| {
            let Some(name) = advertisement.name else { return };
            let mut latched = latched.lock().expect("Failed to lock latched candidate");
            if latched.is_some() || !filter.matches(&name) {
                return;
            }

            debug!("Latched device {} ({})", name.trim(), advertisement.device_id);
            *latched = Some(DeviceCandidate {
                device_id: advertisement.device_id,
                name: name.trim().to_string(),
            });
        })
    };

    if cancel.is_cancelled() {
        return Ok(ScanOutcome::Cancelled);
    }

    info!("Scanning for Kestrel devices...");
    transport.start_scan(on_advertisement).await?;

    let deadline = Instant::now() + max_duration;
    let candidate = loop {
        if let Some(candidate) = latched.lock().expect("Failed to lock latched candidate").clone() {
            break Some(candidate);
        }

        let now = Instant::now();
        if now >= deadline {
            break None;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scan cancelled");
                return Ok(ScanOutcome::Cancelled);
            },
            _ = sleep(poll_interval.min(deadline - now)) => {},
        }
    };

    if let Err(err) = transport.stop_scan().await {
        warn!("Failed to stop scan: {}", err);
    }

    match candidate {
        Some(candidate) => {
            info!("Found device {} ({})", candidate.name, candidate.device_id);
            Ok(ScanOutcome::Found(candidate))
        },
        None => {
            info!("No matching device found within {:?}", max_duration);
            Ok(ScanOutcome::NotFound)
        },
    }
}
