use std::fmt;

use async_trait::async_trait;
use derive_more::Display;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{AdapterState, BluetoothProfile, Device, EnableOutcome};
use crate::error::SessionError;

/// Broadcast families the platform reports through callbacks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum BroadcastCategory {
    #[display("adapter_state")]
    AdapterState,
    #[display("scan_mode")]
    ScanMode,
    #[display("discovery")]
    Discovery,
    #[display("device_found")]
    DeviceFound,
    #[display("bond_state")]
    BondState,
    #[display("acl")]
    Acl,
    #[display("connection_state")]
    ConnectionState,
    #[display("service_uuids")]
    ServiceUuids,
    #[display("profile:{_0}")]
    Profile(BluetoothProfile),
}

/// An untyped platform broadcast as delivered by the driver.
///
/// Codes and actions are passed through unchanged; the session maps them to
/// typed events and drops values it does not recognise.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RawBroadcast {
    AdapterState {
        code: i32,
    },
    ScanMode {
        code: i32,
    },
    Discovery {
        action: String,
    },
    DeviceFound {
        device: Device,
    },
    BondState {
        device: Device,
        code: i32,
        previous_code: Option<i32>,
    },
    Acl {
        device: Device,
        action: String,
    },
    ConnectionState {
        device: Device,
        code: i32,
        previous_code: Option<i32>,
    },
    /// SDP result. `None` means the lookup failed or timed out on the platform side.
    ServiceUuids {
        device: Device,
        uuids: Option<Vec<Uuid>>,
    },
    Profile {
        profile: i32,
        connected: bool,
        devices: Vec<Device>,
    },
}

impl RawBroadcast {
    /// Returns the category this broadcast is delivered under, if it names a
    /// known profile.
    #[must_use]
    pub fn category(&self) -> Option<BroadcastCategory> {
        let category = match self {
            Self::AdapterState { .. } => BroadcastCategory::AdapterState,
            Self::ScanMode { .. } => BroadcastCategory::ScanMode,
            Self::Discovery { .. } => BroadcastCategory::Discovery,
            Self::DeviceFound { .. } => BroadcastCategory::DeviceFound,
            Self::BondState { .. } => BroadcastCategory::BondState,
            Self::Acl { .. } => BroadcastCategory::Acl,
            Self::ConnectionState { .. } => BroadcastCategory::ConnectionState,
            Self::ServiceUuids { .. } => BroadcastCategory::ServiceUuids,
            Self::Profile { profile, .. } => {
                BroadcastCategory::Profile(BluetoothProfile::from_code(*profile)?)
            }
        };
        Some(category)
    }
}

/// Callback target handed to the driver on registration.
///
/// Delivery never blocks the platform thread.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: mpsc::UnboundedSender<RawBroadcast>,
}

impl BroadcastSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<RawBroadcast>) -> Self {
        Self { sender }
    }

    /// Delivers one broadcast. Returns `false` once the session side is gone.
    pub fn deliver(&self, broadcast: RawBroadcast) -> bool {
        self.sender.send(broadcast).is_ok()
    }
}

/// A live platform listener registration, released on drop.
pub struct Registration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Byte stream backing a connected RFCOMM socket.
pub trait RfcommStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RfcommStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A connected socket bound to one remote device.
pub struct Socket {
    remote: Device,
    service_id: Uuid,
    stream: Box<dyn RfcommStream>,
}

impl Socket {
    pub fn new(remote: Device, service_id: Uuid, stream: impl RfcommStream) -> Self {
        Self {
            remote,
            service_id,
            stream: Box::new(stream),
        }
    }

    #[must_use]
    pub fn remote_device(&self) -> &Device {
        &self.remote
    }

    #[must_use]
    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub(crate) fn into_parts(self) -> (Device, Box<dyn RfcommStream>) {
        (self.remote, self.stream)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("remote", &self.remote.address())
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}

/// Parameters of a listening (server role) negotiation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerRequest {
    pub service_name: String,
    pub service_id: Uuid,
    pub secure: bool,
}

/// A listening endpoint owned by a single negotiation attempt.
///
/// Dropping the endpoint must release the underlying OS resource so that a
/// pending `accept` is abandoned without leaking it.
#[async_trait]
pub trait ServerEndpoint: Send {
    /// Waits for one peer to connect.
    async fn accept(&mut self) -> Result<Socket, SessionError>;

    /// Stops listening.
    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// The narrow interface a platform classic-Bluetooth stack must provide.
#[async_trait]
pub trait RadioDriver: fmt::Debug + Send + Sync {
    /// Returns whether Bluetooth hardware and APIs exist at all.
    fn is_available(&self) -> bool;

    async fn adapter_state(&self) -> Result<AdapterState, SessionError>;

    /// Shows the platform's enable prompt and reports the user's answer.
    async fn request_enable(&self) -> Result<EnableOutcome, SessionError>;

    /// Requests a device scan. Returns whether a new scan was started.
    async fn start_discovery(&self) -> Result<bool, SessionError>;

    /// Requests the active scan to stop. Returns whether a scan was stopped.
    async fn cancel_discovery(&self) -> Result<bool, SessionError>;

    async fn is_discovering(&self) -> Result<bool, SessionError>;

    async fn bonded_devices(&self) -> Result<Vec<Device>, SessionError>;

    /// Starts bonding. Returns whether the platform accepted the request.
    async fn create_bond(&self, device: &Device) -> Result<bool, SessionError>;

    /// Triggers SDP; the result arrives as a [`RawBroadcast::ServiceUuids`].
    /// Returns whether the request was issued.
    async fn fetch_uuids(&self, device: &Device) -> Result<bool, SessionError>;

    /// Registers a listener for one broadcast category.
    fn register(
        &self,
        category: BroadcastCategory,
        sink: BroadcastSink,
    ) -> Result<Registration, SessionError>;

    /// Opens a listening endpoint for one service.
    async fn listen(&self, request: &ServerRequest) -> Result<Box<dyn ServerEndpoint>, SessionError>;

    /// Dials a service on a remote device.
    async fn dial(
        &self,
        device: &Device,
        service_id: Uuid,
        secure: bool,
    ) -> Result<Socket, SessionError>;
}
