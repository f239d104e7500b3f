//! Owner of the single logical connection to a Kestrel meter.
//!
//! All mutable state lives in one mutex-guarded record and is never held across an
//! await. Every teardown bumps a generation counter; an in-flight [`ConnectionSupervisor::acquire`]
//! checks the counter after each suspension point and quietly gives up once it has moved,
//! so whichever transition happened last is the one observers end up with.
//!
//! A teardown during `Scanning` cancels the scanner and stops the transport scan itself,
//! before any newer acquisition can start one.
//!
//! Transport disconnect callbacks and the inactivity timer do not touch the state
//! directly. They post a [`SupervisorEvent`] tagged with the generation they belong to,
//! and a single event task applies it (or drops it when stale).

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::device::constants::{
    SENSOR_MEASUREMENT_UUID, STATUS_AUTO_DISCONNECTED, STATUS_DEVICE_DISCONNECTED, STATUS_NOT_CONNECTED,
    WEATHER_SERVICE_UUID,
};
use crate::device::decoder::decode;
use crate::device::publisher::{ObserverId, PublishedState, StatePublisher, Subscription};
use crate::device::scanner::{scan, ScanOutcome};
use crate::device::timer::AutoDisconnectTimer;
use crate::device::transport::Transport;
use crate::device::types::{
    ConnectionState, DeviceCandidate, DeviceConfig, EnvironmentSnapshot, FailureKind, WindClock,
};
use crate::error::DeviceError;

#[derive(Debug)]
enum SupervisorEvent {
    LinkLost { generation: u64 },
    InactivityElapsed { generation: u64 },
}

/// Transport work a teardown left to be undone outside the lock.
#[derive(Debug)]
struct Release {
    scan: bool,
    link: Option<String>,
}

struct Shared {
    state: ConnectionState,
    device: Option<DeviceCandidate>,
    // set while the scanner of the current generation runs
    scan: Option<CancellationToken>,
    snapshot: Option<EnvironmentSnapshot>,
    wind_clock: Option<WindClock>,
    generation: u64,
    timer: AutoDisconnectTimer,
    publisher: StatePublisher,
}

impl Shared {
    fn set(&mut self, state: ConnectionState, status: impl Into<String>, error: Option<String>) {
        self.state = state;
        let wind_clock = self.wind_clock;
        self.publisher.publish(PublishedState {
            state,
            status: status.into(),
            connecting: state.is_connecting(),
            connected: state == ConnectionState::Connected,
            error,
            snapshot: self.snapshot.map(|snapshot| snapshot.with_wind_clock(wind_clock)),
        });
    }

    /// Ends whatever is going on. Returns the running scan and the device whose link is
    /// still up, if any, so that the caller can release them outside the lock.
    fn teardown(&mut self, state: ConnectionState, status: impl Into<String>, error: Option<String>) -> Release {
        self.generation += 1;
        self.timer.cancel();
        self.snapshot = None;

        let scan = self.scan.take().map(|cancel| cancel.cancel()).is_some();
        let link_up = self.state.is_link_up();
        let device = self.device.take();
        self.set(state, status, error);

        Release {
            scan,
            link: device.filter(|_| link_up).map(|device| device.device_id),
        }
    }
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    config: DeviceConfig,
    shared: Mutex<Shared>,
    events: UnboundedSender<SupervisorEvent>,
}

impl<T: Transport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("Failed to lock supervisor state")
    }

    /// Apply `f` only if no teardown happened since `generation` was taken.
    fn update<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut Shared),
    {
        let mut shared = self.lock();
        if shared.generation != generation {
            debug!("Acquisition {} was superseded", generation);
            return false;
        }
        f(&mut shared);
        true
    }

    async fn release_link(&self, device_id: &str) {
        info!("Disconnecting from {}", device_id);
        if let Err(err) = self.transport.disconnect(device_id).await {
            warn!("Failed to disconnect from {}: {}", device_id, err);
        }
    }

    /// Tear down unconditionally, or only when `expected` is still the current generation.
    async fn teardown(&self, expected: Option<u64>, state: ConnectionState, status: &str, error: Option<String>) {
        let release = {
            let mut shared = self.lock();
            if expected.is_some_and(|generation| generation != shared.generation) {
                return;
            }
            shared.teardown(state, status, error)
        };

        if release.scan {
            info!("Stopping superseded scan");
            if let Err(err) = self.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", err);
            }
        }
        if let Some(device_id) = release.link {
            self.release_link(&device_id).await;
        }
    }

    async fn fail(&self, generation: u64, kind: FailureKind, status: String, error: String) {
        warn!("{}", status);
        self.teardown(Some(generation), ConnectionState::Failed(kind), &status, Some(error)).await;
    }

    /// A link this acquisition opened is no longer wanted by anyone.
    async fn abandon(&self, device_id: &str) {
        let reused = self.lock().device.as_ref().is_some_and(|device| device.device_id == device_id);
        if !reused {
            self.release_link(device_id).await;
        }
    }

    fn on_link_lost(&self, generation: u64) {
        let mut shared = self.lock();
        if shared.generation != generation {
            debug!("Ignoring disconnect of a superseded connection");
            return;
        }

        warn!("Device disconnected unexpectedly");
        // the link is already gone, nothing to release
        let _ = shared.teardown(ConnectionState::Disconnected, STATUS_DEVICE_DISCONNECTED, None);
    }

    async fn on_inactivity(&self, generation: u64) {
        info!("No acquisition for {:?}, disconnecting", self.config.auto_disconnect);
        self.teardown(Some(generation), ConnectionState::Idle, STATUS_AUTO_DISCONNECTED, None).await;
    }
}

async fn run_events<T: Transport>(inner: Weak<Inner<T>>, mut events: UnboundedReceiver<SupervisorEvent>) {
    while let Some(event) = events.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        debug!("Supervisor event {:?}", event);
        match event {
            SupervisorEvent::LinkLost { generation } => inner.on_link_lost(generation),
            SupervisorEvent::InactivityElapsed { generation } => inner.on_inactivity(generation).await,
        }
    }
    debug!("Supervisor event task stopped");
}

/// Handle to the acquisition subsystem. Clones share the same connection.
pub struct ConnectionSupervisor<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionSupervisor<T> {
    fn clone(&self) -> Self {
        ConnectionSupervisor { inner: self.inner.clone() }
    }
}

impl<T: Transport> ConnectionSupervisor<T> {
    /// Must be called from within a tokio runtime; spawns the event task.
    pub fn new(transport: Arc<T>, config: DeviceConfig) -> Self {
        let (events, receiver) = unbounded();
        let inner = Arc::new(Inner {
            transport,
            config,
            shared: Mutex::new(Shared {
                state: ConnectionState::Idle,
                device: None,
                scan: None,
                snapshot: None,
                wind_clock: None,
                generation: 0,
                timer: AutoDisconnectTimer::new(),
                publisher: StatePublisher::new(),
            }),
            events,
        });

        spawn(run_events(Arc::downgrade(&inner), receiver));
        ConnectionSupervisor { inner }
    }

    pub fn current(&self) -> PublishedState {
        self.inner.lock().publisher.current().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.lock().publisher.subscribe()
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.inner.lock().publisher.unsubscribe(id);
    }

    /// Annotate the current and all later snapshots with a wind direction.
    pub fn set_wind_clock(&self, wind_clock: Option<WindClock>) {
        let mut shared = self.inner.lock();
        shared.wind_clock = wind_clock;

        let mut state = shared.publisher.current().clone();
        state.snapshot = shared.snapshot.map(|snapshot| snapshot.with_wind_clock(wind_clock));
        shared.publisher.publish(state);
    }

    /// Cancel the inactivity timer and drop the connection. Safe to call at any time.
    pub async fn disconnect(&self) {
        self.inner.teardown(None, ConnectionState::Idle, STATUS_NOT_CONNECTED, None).await;
    }

    /// Scan for a meter, connect, read one measurement record and publish it.
    /// Never fails: the outcome is reported through the published state.
    pub async fn acquire(&self) {
        let inner = &self.inner;
        self.disconnect().await;

        let generation = {
            let mut shared = inner.lock();
            shared.set(ConnectionState::Scanning, "Initializing bluetooth...", None);
            shared.generation
        };

        if let Err(err) = inner.transport.initialize().await {
            inner.fail(generation, FailureKind::ScanFailure, "Bluetooth is not available".to_string(), err.to_string()).await;
            return;
        }

        let bluetooth_warning = match inner.transport.is_enabled().await {
            Ok(true) => None,
            enabled => {
                if let Err(err) = enabled {
                    warn!("Could not determine whether bluetooth is enabled: {}", err);
                }
                match inner.transport.request_enable().await {
                    Ok(()) => None,
                    Err(err) => {
                        warn!("Bluetooth enable request failed: {}", err);
                        Some(DeviceError::BluetoothUnavailable.to_string())
                    },
                }
            },
        };

        let cancel = CancellationToken::new();
        let scanning = inner.update(generation, |shared| {
            shared.scan = Some(cancel.clone());
            shared.set(ConnectionState::Scanning, "Scanning for Kestrel devices...", bluetooth_warning.clone())
        });
        if !scanning {
            return;
        }

        let config = &inner.config;
        let outcome = scan(
            inner.transport.as_ref(),
            &config.name_filter,
            config.scan_timeout,
            config.scan_poll_interval,
            &cancel,
        ).await;

        // a scanner that was not cancelled has stopped its own scan
        if !inner.update(generation, |shared| shared.scan = None) {
            return;
        }

        let candidate = match outcome {
            Ok(ScanOutcome::Found(candidate)) => candidate,
            Ok(ScanOutcome::Cancelled) => return,
            Ok(ScanOutcome::NotFound) => {
                let error = match bluetooth_warning {
                    Some(warning) => format!("{} ({})", DeviceError::NoDeviceFound, warning),
                    None => DeviceError::NoDeviceFound.to_string(),
                };
                inner.fail(generation, FailureKind::NoDeviceFound, DeviceError::NoDeviceFound.to_string(), error).await;
                return;
            },
            Err(err) => {
                inner.fail(generation, FailureKind::ScanFailure, "Scanning failed".to_string(), err.to_string()).await;
                return;
            },
        };

        let device_id = candidate.device_id.clone();
        let name = candidate.name.clone();
        let connecting = inner.update(generation, |shared| {
            shared.device = Some(candidate);
            shared.set(ConnectionState::Connecting, format!("Connecting to {}...", name), None);
        });
        if !connecting {
            return;
        }

        let events = inner.events.clone();
        let on_disconnect = Box::new(move || {
            // the event task is gone only when the supervisor is
            let _ = events.unbounded_send(SupervisorEvent::LinkLost { generation });
        });

        if let Err(err) = inner.transport.connect(&device_id, on_disconnect).await {
            inner.fail(generation, FailureKind::ConnectFailure, format!("Connection failed: {}", err), err.to_string()).await;
            return;
        }

        let discovering = inner.update(generation, |shared| {
            shared.set(ConnectionState::DiscoveringServices, "Discovering services...", None)
        });
        if !discovering {
            // whoever superseded us saw a pending connect and did not disconnect it
            inner.abandon(&device_id).await;
            return;
        }

        let services = match inner.transport.get_services(&device_id).await {
            Ok(services) => services,
            Err(err) => {
                inner.fail(generation, FailureKind::ServiceDiscoveryFailure, format!("Connection failed: {}", err), err.to_string()).await;
                return;
            },
        };

        // Connected and "has weather data" are independent outcomes
        let missing = match services.iter().find(|service| service.uuid == WEATHER_SERVICE_UUID) {
            None => Some(DeviceError::ServiceNotFound),
            Some(service) if !service.characteristics.contains(&SENSOR_MEASUREMENT_UUID) => {
                Some(DeviceError::CharacteristicNotFound)
            },
            Some(_) => None,
        };
        if let Some(missing) = missing {
            info!("Connected to {} without weather data: {}", name, missing);
            let connected = inner.update(generation, |shared| {
                shared.set(ConnectionState::Connected, format!("Connected to {} (no weather data)", name), Some(missing.to_string()))
            });
            if !connected {
                // a teardown raced the service lookup and already released the link
                debug!("Partial result for {} discarded", name);
            }
            return;
        }

        let reading = inner.update(generation, |shared| {
            shared.set(ConnectionState::Reading, "Reading weather data...", None)
        });
        if !reading {
            return;
        }

        let bytes = match inner.transport.read(&device_id, WEATHER_SERVICE_UUID, SENSOR_MEASUREMENT_UUID).await {
            Ok(bytes) => bytes,
            Err(err) => {
                inner.fail(generation, FailureKind::ReadFailure, format!("Connection failed: {}", err), err.to_string()).await;
                return;
            },
        };

        let snapshot = match decode(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Unexpected measurement record from {}: {}", name, err);
                inner.fail(generation, FailureKind::MalformedPayload, format!("Connection failed: {}", err), err.to_string()).await;
                return;
            },
        };

        let weak = Arc::downgrade(inner);
        inner.update(generation, |shared| {
            info!("Read from {}: {}", name, snapshot);
            shared.snapshot = Some(snapshot);
            shared.set(ConnectionState::Connected, format!("Connected to {}", name), None);

            shared.timer.arm(inner.config.auto_disconnect, move || {
                if let Some(inner) = weak.upgrade() {
                    let _ = inner.events.unbounded_send(SupervisorEvent::InactivityElapsed { generation });
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{sleep, sleep_until, Instant};
    use crate::device::fake::{FakeTransport, REFERENCE_RECORD};

    fn supervisor(transport: FakeTransport) -> (Arc<FakeTransport>, ConnectionSupervisor<FakeTransport>) {
        let transport = Arc::new(transport);
        let supervisor = ConnectionSupervisor::new(transport.clone(), DeviceConfig::default());
        (transport, supervisor)
    }

    fn kestrel() -> FakeTransport {
        FakeTransport::new().with_advertisements(&["Foo", "Elite 5700", "Bar"])
    }

    fn drain(subscription: &mut Subscription) -> Vec<PublishedState> {
        let mut states = Vec::new();
        while let Ok(Some(state)) = subscription.receiver.try_next() {
            states.push(state);
        }
        states
    }

    // let the event task run
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn acquires_and_publishes_snapshot() {
        let (transport, supervisor) = supervisor(kestrel());
        let mut subscription = supervisor.subscribe();

        supervisor.acquire().await;

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Connected);
        assert!(current.connected);
        assert!(!current.connecting);
        assert_eq!(current.status, "Connected to Elite 5700");
        assert_eq!(current.error, None);
        assert_eq!(current.snapshot, Some(decode(&REFERENCE_RECORD).unwrap()));
        assert_eq!(transport.calls().connects, vec!["dev-1".to_string()]);
        assert_eq!(transport.calls().reads, 1);

        let mut states: Vec<ConnectionState> = drain(&mut subscription).into_iter().map(|state| state.state).collect();
        states.dedup();
        assert_eq!(
            states,
            vec![
                ConnectionState::Idle,
                ConnectionState::Scanning,
                ConnectionState::Connecting,
                ConnectionState::DiscoveringServices,
                ConnectionState::Reading,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_matching_device() {
        let (transport, supervisor) = supervisor(FakeTransport::new().with_advertisements(&["Foo", "Bar"]));

        supervisor.acquire().await;

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Failed(FailureKind::NoDeviceFound));
        assert!(!current.connected);
        assert!(!current.connecting);
        assert_eq!(current.error.as_deref(), Some("No Kestrel device found"));
        assert!(transport.calls().connects.is_empty());
        assert_eq!(transport.calls().scans_stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_characteristic_is_a_partial_success() {
        let (_transport, supervisor) = supervisor(kestrel().without_measurement_characteristic());

        supervisor.acquire().await;

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Connected);
        assert!(current.connected);
        assert_eq!(current.snapshot, None);
        assert_eq!(current.error, Some(DeviceError::CharacteristicNotFound.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_is_a_partial_success() {
        let (transport, supervisor) = supervisor(kestrel().with_services(vec![]));

        supervisor.acquire().await;

        let current = supervisor.current();
        assert!(current.connected);
        assert_eq!(current.snapshot, None);
        assert_eq!(current.error, Some(DeviceError::ServiceNotFound.to_string()));
        assert_eq!(transport.calls().reads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_fails_the_connection() {
        let (transport, supervisor) = supervisor(kestrel().failing_read("gatt error"));

        supervisor.acquire().await;

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Failed(FailureKind::ReadFailure));
        assert!(!current.connected);
        assert!(current.status.starts_with("Connection failed"));
        assert!(current.error.unwrap().contains("gatt error"));
        assert_eq!(transport.calls().disconnects, vec!["dev-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_record_fails_the_connection() {
        let (_transport, supervisor) = supervisor(kestrel().with_payload(vec![0; 5]));

        supervisor.acquire().await;

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Failed(FailureKind::MalformedPayload));
        assert_eq!(current.snapshot, None);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure() {
        let (transport, supervisor) = supervisor(kestrel().failing_connect());

        supervisor.acquire().await;

        assert_eq!(supervisor.state(), ConnectionState::Failed(FailureKind::ConnectFailure));
        assert!(!supervisor.current().connected);
        assert!(transport.calls().disconnects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_bluetooth_does_not_abort() {
        let (transport, supervisor) = supervisor(kestrel().disabled());

        supervisor.acquire().await;

        assert_eq!(transport.calls().enable_requested, 1);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent() {
        let (transport, supervisor) = supervisor(kestrel());
        supervisor.acquire().await;

        supervisor.disconnect().await;
        let once = supervisor.current();
        supervisor.disconnect().await;
        let twice = supervisor.current();

        assert_eq!(once, twice);
        assert_eq!(twice.state, ConnectionState::Idle);
        assert_eq!(twice.status, STATUS_NOT_CONNECTED);
        assert!(!twice.connected);
        assert_eq!(twice.snapshot, None);
        assert_eq!(transport.calls().disconnects, vec!["dev-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_when_idle_does_nothing_to_the_transport() {
        let (transport, supervisor) = supervisor(kestrel());

        supervisor.disconnect().await;

        assert_eq!(supervisor.current(), PublishedState::default());
        assert!(transport.calls().disconnects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_disconnects_after_inactivity() {
        let (transport, supervisor) = supervisor(kestrel());
        supervisor.acquire().await;

        sleep(Duration::from_secs(299)).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);

        sleep(Duration::from_secs(2)).await;
        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Idle);
        assert_eq!(current.status, STATUS_AUTO_DISCONNECTED);
        assert_eq!(current.snapshot, None);
        assert_eq!(transport.calls().disconnects, vec!["dev-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_prevents_auto_disconnect() {
        let (transport, supervisor) = supervisor(kestrel());
        supervisor.acquire().await;
        supervisor.disconnect().await;

        let mut subscription = supervisor.subscribe();
        let _ = drain(&mut subscription);

        sleep(Duration::from_secs(600)).await;

        assert!(drain(&mut subscription).is_empty());
        assert_eq!(supervisor.current().status, STATUS_NOT_CONNECTED);
        assert_eq!(transport.calls().disconnects.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_acquisition_restarts_the_inactivity_window() {
        let (_transport, supervisor) = supervisor(kestrel());
        supervisor.acquire().await;

        sleep(Duration::from_secs(200)).await;
        supervisor.acquire().await;

        sleep(Duration::from_secs(200)).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);

        sleep(Duration::from_secs(150)).await;
        assert_eq!(supervisor.current().status, STATUS_AUTO_DISCONNECTED);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_tears_down_the_previous_connection() {
        let (transport, supervisor) = supervisor(kestrel());
        supervisor.acquire().await;
        supervisor.acquire().await;

        let calls = transport.calls();
        assert_eq!(calls.connects.len(), 2);
        assert_eq!(calls.disconnects, vec!["dev-1".to_string()]);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_disconnect_clears_state_and_timer() {
        let (transport, supervisor) = supervisor(kestrel());
        supervisor.acquire().await;

        transport.drop_link();
        settle().await;

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Disconnected);
        assert_eq!(current.status, STATUS_DEVICE_DISCONNECTED);
        assert_eq!(current.snapshot, None);

        sleep(Duration::from_secs(600)).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        // the link was already down
        assert!(transport.calls().disconnects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_disconnect_mid_read_wins() {
        let gate = Arc::new(Notify::new());
        let (transport, supervisor) = supervisor(kestrel().with_read_gate(gate.clone()));

        let acquisition = spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.acquire().await }
        });
        while transport.calls().reads == 0 {
            settle().await;
        }

        transport.drop_link();
        settle().await;
        gate.notify_one();
        acquisition.await.unwrap();

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Disconnected);
        assert_eq!(current.snapshot, None);

        sleep(Duration::from_secs(600)).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_mid_read_wins() {
        let gate = Arc::new(Notify::new());
        let (transport, supervisor) = supervisor(kestrel().with_read_gate(gate.clone()));

        let acquisition = spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.acquire().await }
        });
        while transport.calls().reads == 0 {
            settle().await;
        }

        supervisor.disconnect().await;
        gate.notify_one();
        acquisition.await.unwrap();

        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Idle);
        assert_eq!(current.snapshot, None);
        assert_eq!(transport.calls().disconnects, vec!["dev-1".to_string()]);

        sleep(Duration::from_secs(600)).await;
        assert_eq!(supervisor.current().status, STATUS_NOT_CONNECTED);
    }

    #[tokio::test(start_paused = true)]
    async fn wind_clock_annotates_snapshots() {
        let (_transport, supervisor) = supervisor(kestrel());
        let three = WindClock::new(3).unwrap();

        supervisor.set_wind_clock(Some(three));
        supervisor.acquire().await;
        assert_eq!(supervisor.current().snapshot.unwrap().wind_clock, Some(three));

        let nine = WindClock::new(9).unwrap();
        let mut subscription = supervisor.subscribe();
        supervisor.set_wind_clock(Some(nine));

        let published = drain(&mut subscription);
        let last = published.last().unwrap();
        assert_eq!(last.snapshot.unwrap().wind_clock, Some(nine));
        assert_eq!(last.snapshot.unwrap().temperature_c, Some(20.68));
        assert_eq!(last.state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_observer_gets_nothing_more() {
        let (_transport, supervisor) = supervisor(kestrel());
        let mut subscription = supervisor.subscribe();
        supervisor.unsubscribe(subscription.id);

        supervisor.acquire().await;

        let received = drain(&mut subscription);
        assert_eq!(received, vec![PublishedState::default()]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_scanning_stops_the_scan() {
        let (transport, supervisor) = supervisor(FakeTransport::new().with_advertisements(&["Foo"]));
        let started = Instant::now();

        let acquisition = spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.acquire().await }
        });
        while transport.calls().scans_started == 0 {
            settle().await;
        }

        supervisor.disconnect().await;
        assert_eq!(transport.calls().scans_stopped, 1);
        acquisition.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Idle);
        assert_eq!(current.status, STATUS_NOT_CONNECTED);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(supervisor.state(), ConnectionState::Idle);
        assert_eq!(transport.calls().scans_stopped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_while_scanning_keeps_the_newer_scan_alive() {
        let (transport, supervisor) = supervisor(FakeTransport::new());
        let started = Instant::now();

        let first = spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.acquire().await }
        });
        while transport.calls().scans_started == 0 {
            settle().await;
        }

        sleep(Duration::from_secs(1)).await;
        let second = spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.acquire().await }
        });
        while transport.calls().scans_started < 2 {
            settle().await;
        }
        first.await.unwrap();
        assert_eq!(transport.calls().scans_stopped, 1);

        // past the deadline of the first scan, within that of the second
        sleep_until(started + Duration::from_millis(10_500)).await;
        assert_eq!(supervisor.state(), ConnectionState::Scanning);
        transport.advertise("dev-late", "Elite 5700");
        second.await.unwrap();

        let calls = transport.calls();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(calls.scans_started, 2);
        assert_eq!(calls.scans_stopped, 2);
        assert_eq!(calls.connects, vec!["dev-late".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_connecting_releases_the_late_link() {
        let gate = Arc::new(Notify::new());
        let (transport, supervisor) = supervisor(kestrel().with_connect_gate(gate.clone()));

        let acquisition = spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.acquire().await }
        });
        while transport.calls().connects.is_empty() {
            settle().await;
        }
        assert_eq!(supervisor.state(), ConnectionState::Connecting);

        supervisor.disconnect().await;
        // nothing to release yet, the connect is still pending
        assert!(transport.calls().disconnects.is_empty());

        gate.notify_one();
        acquisition.await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.disconnects, vec!["dev-1".to_string()]);
        assert_eq!(calls.reads, 0);
        let current = supervisor.current();
        assert_eq!(current.state, ConnectionState::Idle);
        assert_eq!(current.status, STATUS_NOT_CONNECTED);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_scan_is_stopped_only_once() {
        let (transport, supervisor) = supervisor(FakeTransport::new().with_advertisements(&["Foo"]));

        supervisor.acquire().await;
        supervisor.disconnect().await;

        assert_eq!(supervisor.state(), ConnectionState::Idle);
        assert_eq!(transport.calls().scans_stopped, 1);
    }
}
