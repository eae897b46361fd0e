mod adapter;
mod bond;
mod connection;
mod discovery;
mod events;
mod negotiator;
mod profile;
mod uuids;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bon::bon;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub use self::adapter::AdapterStateTracker;
pub use self::bond::BondController;
pub use self::connection::{DuplexConnection, ReadStream};
use self::connection::ConnectionInner;
pub use self::discovery::DiscoveryController;
pub use self::events::EventStream;
use self::events::EventHub;
pub use self::negotiator::{Negotiation, NegotiationState, SocketNegotiator};
pub use self::profile::ProfileConnectionTracker;
pub use self::uuids::UuidResolver;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::radio::{AdapterState, Device, DeviceOrigin, RadioDriver, Socket};

/// Gate consulted before a discovery scan is started.
pub trait DiscoveryPermission: fmt::Debug + Send + Sync {
    fn is_granted(&self) -> bool;
}

/// Permission gate that always allows discovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl DiscoveryPermission for AlwaysGranted {
    fn is_granted(&self) -> bool {
        true
    }
}

/// Runtime handles used by the session.
///
/// `compute` runs broadcast re-emission; `io` runs negotiations and socket
/// reads. Streams are delivered wherever the caller polls them.
#[derive(Debug, Clone)]
pub struct Executors {
    compute: Handle,
    io: Handle,
}

impl Executors {
    #[must_use]
    pub fn new(compute: Handle, io: Handle) -> Self {
        Self { compute, io }
    }

    /// Uses the current tokio runtime for both roles.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoRuntime`] outside a tokio runtime.
    pub fn current() -> Result<Self, SessionError> {
        let handle = Handle::try_current()?;
        Ok(Self::new(handle.clone(), handle))
    }

    #[must_use]
    pub fn compute(&self) -> &Handle {
        &self.compute
    }

    #[must_use]
    pub fn io(&self) -> &Handle {
        &self.io
    }
}

pub(crate) struct SessionCore {
    driver: Arc<dyn RadioDriver>,
    config: SessionConfig,
    executors: Executors,
    hub: EventHub,
    shutdown: CancellationToken,
    closing: AtomicBool,
    connections: Mutex<Vec<Weak<ConnectionInner>>>,
    permission: Arc<dyn DiscoveryPermission>,
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

impl SessionCore {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if !self.driver.is_available() {
            return Err(SessionError::Unsupported);
        }
        Ok(())
    }

    async fn ensure_enabled(&self, operation: &'static str) -> Result<(), SessionError> {
        self.ensure_available()?;
        ensure_enabled(self.driver.as_ref(), operation).await
    }
}

/// Fails unless the driver is available and the adapter is on.
pub(crate) async fn ensure_enabled(
    driver: &dyn RadioDriver,
    operation: &'static str,
) -> Result<(), SessionError> {
    if !driver.is_available() {
        return Err(SessionError::Unsupported);
    }
    if driver.adapter_state().await? != AdapterState::On {
        return Err(SessionError::AdapterDisabled { operation });
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point owning one radio driver and everything built on it.
///
/// Component handles are cheap to clone and share the session.
///
/// ```
/// # async fn demo() -> Result<(), btsession::SessionError> {
/// use std::sync::Arc;
///
/// let radio = btsession::FakeRadio::new(btsession::FakeRadioConfig::builder().build());
/// let session = btsession::BluetoothSession::builder()
///     .driver(Arc::new(radio))
///     .build()?;
/// assert!(session.adapter().is_enabled().await?);
/// session.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BluetoothSession {
    core: Arc<SessionCore>,
}

#[bon]
impl BluetoothSession {
    /// Creates a session over `driver`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoRuntime`] when no executors are given and no
    /// tokio runtime is current.
    #[builder]
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        #[builder(default)] config: SessionConfig,
        executors: Option<Executors>,
        permission: Option<Arc<dyn DiscoveryPermission>>,
    ) -> Result<Self, SessionError> {
        let executors = match executors {
            Some(executors) => executors,
            None => Executors::current()?,
        };
        let shutdown = CancellationToken::new();
        let hub = EventHub::new(
            Arc::clone(&driver),
            executors.compute().clone(),
            shutdown.clone(),
        );
        debug!(?driver, "bluetooth session created");

        Ok(Self {
            core: Arc::new(SessionCore {
                driver,
                config,
                executors,
                hub,
                shutdown,
                closing: AtomicBool::new(false),
                connections: Mutex::new(Vec::new()),
                permission: permission.unwrap_or_else(|| Arc::new(AlwaysGranted)),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    #[must_use]
    pub fn discovery(&self) -> DiscoveryController {
        DiscoveryController::new(Arc::clone(&self.core))
    }

    #[must_use]
    pub fn adapter(&self) -> AdapterStateTracker {
        AdapterStateTracker::new(Arc::clone(&self.core))
    }

    #[must_use]
    pub fn bonds(&self) -> BondController {
        BondController::new(Arc::clone(&self.core))
    }

    #[must_use]
    pub fn profiles(&self) -> ProfileConnectionTracker {
        ProfileConnectionTracker::new(Arc::clone(&self.core))
    }

    #[must_use]
    pub fn uuids(&self) -> UuidResolver {
        UuidResolver::new(Arc::clone(&self.core))
    }

    #[must_use]
    pub fn negotiator(&self) -> SocketNegotiator {
        SocketNegotiator::new(Arc::clone(&self.core))
    }

    /// Wraps a negotiated socket. The connection is closed on shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] after shutdown.
    pub fn open_connection(&self, socket: Socket) -> Result<DuplexConnection, SessionError> {
        self.core.ensure_open()?;
        let connection = DuplexConnection::new(
            socket,
            self.core.executors.io().clone(),
            self.core.config.read_buffer(),
            self.core.config.line_delimiters(),
        );

        let mut connections = lock(&self.core.connections);
        connections.retain(|inner| inner.strong_count() > 0);
        connections.push(connection.downgrade());
        Ok(connection)
    }

    /// Returns the bonded devices, sorted by address.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio is unavailable or off.
    #[instrument(skip(self), level = "debug")]
    pub async fn bonded_devices(&self) -> Result<Vec<Device>, SessionError> {
        self.core.ensure_enabled("list bonded devices").await?;
        let mut devices: Vec<Device> = self
            .core
            .driver
            .bonded_devices()
            .await?
            .into_iter()
            .map(|device| device.with_origin(DeviceOrigin::Bonded))
            .collect();
        devices.sort_by(|left, right| left.address().cmp(right.address()));
        devices.dedup();
        Ok(devices)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.core.closing.load(Ordering::SeqCst)
    }

    /// Tears the session down.
    ///
    /// Cancels an active scan, closes every connection opened through the
    /// session, then ends all streams and negotiations and releases every
    /// platform listener. Later calls are no-ops.
    #[instrument(skip(self), level = "debug")]
    pub async fn shutdown(&self) {
        if self.core.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.core.driver.is_available() {
            match self.core.driver.cancel_discovery().await {
                Ok(cancelled) => debug!(cancelled, "discovery stopped"),
                Err(error) => debug!(%error, "discovery could not be cancelled"),
            }
        }

        let connections: Vec<_> = lock(&self.core.connections)
            .drain(..)
            .filter_map(|inner| inner.upgrade())
            .collect();
        let closed = connections.len();
        for inner in connections {
            DuplexConnection::from_inner(inner).close().await;
        }

        self.core.shutdown.cancel();
        self.core.hub.close();
        info!(connections = closed, "bluetooth session shut down");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::radio::{FakeRadio, FakeRadioConfig};

    fn session(config: FakeRadioConfig) -> BluetoothSession {
        BluetoothSession::builder()
            .driver(Arc::new(FakeRadio::new(config)))
            .build()
            .expect("session should build inside a runtime")
    }

    #[test]
    fn building_outside_a_runtime_needs_executors() {
        let result = BluetoothSession::builder()
            .driver(Arc::new(FakeRadio::new(FakeRadioConfig::builder().build())))
            .build();
        assert_matches!(result, Err(SessionError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn bonded_devices_are_sorted_by_address() {
        let session = session(
            FakeRadioConfig::builder()
                .scan(
                    "AA:BB:CC:DD:EE:03|Printer|bonded;AA:BB:CC:DD:EE:01|-|bonded;AA:BB:CC:DD:EE:02|Phone|none"
                        .parse()
                        .expect("fixture should parse"),
                )
                .build(),
        );

        let devices = session
            .bonded_devices()
            .await
            .expect("bonded devices should be listed");
        let addresses: Vec<String> = devices
            .iter()
            .map(|device| device.address().to_string())
            .collect();

        assert_eq!(vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:03"], addresses);
        assert!(
            devices
                .iter()
                .all(|device| device.origin() == DeviceOrigin::Bonded)
        );
    }

    #[tokio::test]
    async fn bonded_devices_need_the_adapter_on() {
        let session = session(FakeRadioConfig::builder().adapter_off(true).build());
        assert_matches!(
            session.bonded_devices().await,
            Err(SessionError::AdapterDisabled { .. })
        );
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let session = session(FakeRadioConfig::builder().build());
        session.shutdown().await;
        session.shutdown().await;

        assert!(session.is_shut_down());
        assert_matches!(
            session.adapter().observe_state(),
            Err(SessionError::SessionClosed)
        );
    }
}
