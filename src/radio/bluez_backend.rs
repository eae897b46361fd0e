use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bluer::rfcomm::{ProfileHandle, Role};
use bluer::{AdapterEvent, AdapterProperty, DeviceEvent, DeviceProperty};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::driver::{
    BroadcastCategory, BroadcastSink, RadioDriver, RawBroadcast, Registration, ServerEndpoint,
    ServerRequest, Socket,
};
use super::types::{
    AclAction, AdapterState, Address, BondState, ConnectionState, Device, DeviceOrigin,
    DiscoveryPhase, EnableOutcome, ScanMode,
};
use crate::error::SessionError;

type DeviceEvents = Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>;

/// Radio driver backed by the BlueZ D-Bus API.
pub(crate) struct BluezRadio {
    session: bluer::Session,
    adapter: bluer::Adapter,
    runtime: Handle,
    discovery: Mutex<Option<JoinHandle<()>>>,
    uuid_sinks: Arc<Mutex<Vec<(u64, BroadcastSink)>>>,
    next_sink: Mutex<u64>,
}

impl std::fmt::Debug for BluezRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezRadio")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BluezRadio {
    /// Connects to `bluetoothd` and opens the default adapter.
    pub(crate) async fn new() -> Result<Self, SessionError> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!(adapter = adapter.name(), "using BlueZ adapter");

        Ok(Self {
            session,
            adapter,
            runtime: Handle::try_current()?,
            discovery: Mutex::new(None),
            uuid_sinks: Arc::new(Mutex::new(Vec::new())),
            next_sink: Mutex::new(0),
        })
    }

    async fn describe(&self, address: bluer::Address) -> Result<Device, SessionError> {
        describe_device(&self.adapter, address).await
    }

    fn bluer_device(&self, device: &Device) -> Result<bluer::Device, SessionError> {
        Ok(self
            .adapter
            .device(bluer::Address::new(device.address().octets()))?)
    }

    async fn register_rfcomm(
        &self,
        service_id: Uuid,
        name: Option<String>,
        role: Role,
        secure: bool,
    ) -> Result<ProfileHandle, SessionError> {
        let profile = bluer::rfcomm::Profile {
            uuid: service_id,
            name,
            role: Some(role),
            require_authentication: Some(secure),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        Ok(self.session.register_profile(profile).await?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_address(address: bluer::Address) -> Address {
    Address::new(address.0)
}

async fn describe_device(
    adapter: &bluer::Adapter,
    address: bluer::Address,
) -> Result<Device, SessionError> {
    let device = adapter.device(address)?;
    let bond_state = if device.is_paired().await? {
        BondState::Bonded
    } else {
        BondState::None
    };
    let described = Device::new(to_address(address)).with_bond_state(bond_state);
    Ok(match device.name().await? {
        Some(name) => described.with_name(name),
        None => described,
    })
}

fn adapter_broadcast(category: BroadcastCategory, property: AdapterProperty) -> Option<RawBroadcast> {
    match (category, property) {
        (BroadcastCategory::AdapterState, AdapterProperty::Powered(powered)) => {
            let state = if powered {
                AdapterState::On
            } else {
                AdapterState::Off
            };
            Some(RawBroadcast::AdapterState { code: state.code() })
        }
        (BroadcastCategory::ScanMode, AdapterProperty::Discoverable(discoverable)) => {
            let mode = if discoverable {
                ScanMode::ConnectableDiscoverable
            } else {
                ScanMode::Connectable
            };
            Some(RawBroadcast::ScanMode { code: mode.code() })
        }
        (BroadcastCategory::Discovery, AdapterProperty::Discovering(discovering)) => {
            let phase = if discovering {
                DiscoveryPhase::Started
            } else {
                DiscoveryPhase::Finished
            };
            Some(RawBroadcast::Discovery {
                action: phase.action().to_string(),
            })
        }
        _ => None,
    }
}

fn device_broadcast(
    category: BroadcastCategory,
    device: Device,
    property: DeviceProperty,
) -> Option<RawBroadcast> {
    match (category, property) {
        (BroadcastCategory::BondState, DeviceProperty::Paired(paired)) => {
            let (state, previous) = if paired {
                (BondState::Bonded, BondState::Bonding)
            } else {
                (BondState::None, BondState::Bonded)
            };
            Some(RawBroadcast::BondState {
                device: device.with_bond_state(state),
                code: state.code(),
                previous_code: Some(previous.code()),
            })
        }
        (BroadcastCategory::Acl, DeviceProperty::Connected(connected)) => {
            let action = if connected {
                AclAction::Connected
            } else {
                AclAction::Disconnected
            };
            Some(RawBroadcast::Acl {
                device,
                action: action.action().to_string(),
            })
        }
        (BroadcastCategory::ConnectionState, DeviceProperty::Connected(connected)) => {
            let (state, previous) = if connected {
                (ConnectionState::Connected, ConnectionState::Connecting)
            } else {
                (ConnectionState::Disconnected, ConnectionState::Disconnecting)
            };
            Some(RawBroadcast::ConnectionState {
                device,
                code: state.code(),
                previous_code: Some(previous.code()),
            })
        }
        _ => None,
    }
}

async fn watch_adapter(
    adapter: bluer::Adapter,
    category: BroadcastCategory,
    sink: BroadcastSink,
) -> Result<(), SessionError> {
    let mut events = Box::pin(adapter.events().await?);
    while let Some(event) = events.next().await {
        let raw = match event {
            AdapterEvent::PropertyChanged(property) => adapter_broadcast(category, property),
            AdapterEvent::DeviceAdded(address) if category == BroadcastCategory::DeviceFound => {
                match describe_device(&adapter, address).await {
                    Ok(device) => Some(RawBroadcast::DeviceFound { device }),
                    Err(error) => {
                        debug!(%address, %error, "skipping device that vanished before lookup");
                        None
                    }
                }
            }
            _ => None,
        };
        if let Some(raw) = raw
            && !sink.deliver(raw)
        {
            break;
        }
    }
    Ok(())
}

async fn watch_devices(
    adapter: bluer::Adapter,
    category: BroadcastCategory,
    sink: BroadcastSink,
) -> Result<(), SessionError> {
    let mut adapter_events = Box::pin(adapter.events().await?);
    let mut devices: StreamMap<bluer::Address, DeviceEvents> = StreamMap::new();
    for address in adapter.device_addresses().await? {
        track_device(&adapter, &mut devices, address).await;
    }

    loop {
        tokio::select! {
            Some(event) = adapter_events.next() => match event {
                AdapterEvent::DeviceAdded(address) => {
                    track_device(&adapter, &mut devices, address).await;
                }
                AdapterEvent::DeviceRemoved(address) => {
                    devices.remove(&address);
                }
                _ => {}
            },
            Some((address, DeviceEvent::PropertyChanged(property))) = devices.next() => {
                let device = match describe_device(&adapter, address).await {
                    Ok(device) => device,
                    Err(error) => {
                        debug!(%address, %error, "skipping change of a device that vanished");
                        continue;
                    }
                };
                if let Some(raw) = device_broadcast(category, device, property)
                    && !sink.deliver(raw)
                {
                    return Ok(());
                }
            }
            else => return Ok(()),
        }
    }
}

/// BlueZ reports service UUIDs as a set; sorting keeps the reported order
/// stable between lookups.
fn ordered_uuids(uuids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ordered: Vec<Uuid> = uuids.into_iter().collect();
    ordered.sort_unstable();
    ordered
}

/// Follows property changes of one device. A device that disappears before
/// its events can be opened is left out.
async fn track_device(
    adapter: &bluer::Adapter,
    devices: &mut StreamMap<bluer::Address, DeviceEvents>,
    address: bluer::Address,
) {
    let events = match adapter.device(address) {
        Ok(device) => device.events().await,
        Err(error) => Err(error),
    };
    match events {
        Ok(events) => {
            devices.insert(address, Box::pin(events));
        }
        Err(error) => debug!(%address, %error, "not following device events"),
    }
}

struct BluezEndpoint {
    adapter: bluer::Adapter,
    service_id: Uuid,
    handle: ProfileHandle,
}

#[async_trait]
impl ServerEndpoint for BluezEndpoint {
    async fn accept(&mut self) -> Result<Socket, SessionError> {
        let request = self
            .handle
            .next()
            .await
            .ok_or_else(SessionError::connection_closed)?;
        let remote = describe_device(&self.adapter, request.device()).await?;
        let stream = request.accept().map_err(SessionError::from_connect_io)?;
        debug!(address = %remote.address(), "RFCOMM peer accepted");
        Ok(Socket::new(remote, self.service_id, stream))
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        debug!(service_id = %self.service_id, "unregistering RFCOMM profile");
        Ok(())
    }
}

#[async_trait]
impl RadioDriver for BluezRadio {
    fn is_available(&self) -> bool {
        true
    }

    async fn adapter_state(&self) -> Result<AdapterState, SessionError> {
        Ok(if self.adapter.is_powered().await? {
            AdapterState::On
        } else {
            AdapterState::Off
        })
    }

    async fn request_enable(&self) -> Result<EnableOutcome, SessionError> {
        match self.adapter.set_powered(true).await {
            Ok(()) => Ok(EnableOutcome::Enabled),
            Err(error) => {
                warn!(%error, "adapter could not be powered on");
                Ok(EnableOutcome::Declined)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_discovery(&self) -> Result<bool, SessionError> {
        if let Some(task) = lock(&self.discovery).as_ref()
            && !task.is_finished()
        {
            return Ok(false);
        }

        let stream = self.adapter.discover_devices().await?;
        let task = self.runtime.spawn(async move {
            let mut stream = Box::pin(stream);
            while stream.next().await.is_some() {}
        });
        *lock(&self.discovery) = Some(task);
        Ok(true)
    }

    async fn cancel_discovery(&self) -> Result<bool, SessionError> {
        Ok(match lock(&self.discovery).take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        })
    }

    async fn is_discovering(&self) -> Result<bool, SessionError> {
        Ok(self.adapter.is_discovering().await?)
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>, SessionError> {
        let mut bonded = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.describe(address).await?;
            if device.bond_state() == BondState::Bonded {
                bonded.push(device.with_origin(DeviceOrigin::Bonded));
            }
        }
        Ok(bonded)
    }

    async fn create_bond(&self, device: &Device) -> Result<bool, SessionError> {
        let remote = self.bluer_device(device)?;
        if remote.is_paired().await? {
            return Ok(false);
        }

        let address = *device.address();
        self.runtime.spawn(async move {
            if let Err(error) = remote.pair().await {
                warn!(%address, %error, "pairing failed");
            }
        });
        Ok(true)
    }

    async fn fetch_uuids(&self, device: &Device) -> Result<bool, SessionError> {
        if !self.adapter.is_powered().await? {
            return Ok(false);
        }

        let remote = self.bluer_device(device)?;
        let described = self
            .describe(bluer::Address::new(device.address().octets()))
            .await?;
        let sinks = Arc::clone(&self.uuid_sinks);
        self.runtime.spawn(async move {
            let uuids = match remote.uuids().await {
                Ok(uuids) => uuids.map(ordered_uuids),
                Err(error) => {
                    debug!(%error, "SDP lookup failed");
                    None
                }
            };
            for (_, sink) in lock(&sinks).iter() {
                sink.deliver(RawBroadcast::ServiceUuids {
                    device: described.clone(),
                    uuids: uuids.clone(),
                });
            }
        });
        Ok(true)
    }

    fn register(
        &self,
        category: BroadcastCategory,
        sink: BroadcastSink,
    ) -> Result<Registration, SessionError> {
        let adapter = self.adapter.clone();
        let task = match category {
            BroadcastCategory::AdapterState
            | BroadcastCategory::ScanMode
            | BroadcastCategory::Discovery
            | BroadcastCategory::DeviceFound => self.runtime.spawn(async move {
                if let Err(error) = watch_adapter(adapter, category, sink).await {
                    warn!(%category, %error, "BlueZ adapter watch stopped");
                }
            }),
            BroadcastCategory::BondState
            | BroadcastCategory::Acl
            | BroadcastCategory::ConnectionState => self.runtime.spawn(async move {
                if let Err(error) = watch_devices(adapter, category, sink).await {
                    warn!(%category, %error, "BlueZ device watch stopped");
                }
            }),
            BroadcastCategory::ServiceUuids => {
                let id = {
                    let mut next = lock(&self.next_sink);
                    *next += 1;
                    *next
                };
                lock(&self.uuid_sinks).push((id, sink));
                let sinks = Arc::clone(&self.uuid_sinks);
                return Ok(Registration::new(move || {
                    lock(&sinks).retain(|(sink_id, _)| *sink_id != id);
                }));
            }
            BroadcastCategory::Profile(_) => return Err(SessionError::Unsupported),
        };

        Ok(Registration::new(move || task.abort()))
    }

    #[instrument(skip(self), level = "debug", fields(service_id = %request.service_id))]
    async fn listen(
        &self,
        request: &ServerRequest,
    ) -> Result<Box<dyn ServerEndpoint>, SessionError> {
        let handle = self
            .register_rfcomm(
                request.service_id,
                Some(request.service_name.clone()),
                Role::Server,
                request.secure,
            )
            .await?;
        Ok(Box::new(BluezEndpoint {
            adapter: self.adapter.clone(),
            service_id: request.service_id,
            handle,
        }))
    }

    #[instrument(skip(self, device), level = "debug", fields(address = %device.address()))]
    async fn dial(
        &self,
        device: &Device,
        service_id: Uuid,
        secure: bool,
    ) -> Result<Socket, SessionError> {
        let mut handle = self
            .register_rfcomm(service_id, None, Role::Client, secure)
            .await?;
        let remote = self.bluer_device(device)?;

        let connect = remote.connect_profile(&service_id);
        tokio::pin!(connect);
        let request = tokio::select! {
            result = &mut connect => {
                result.map_err(|error| SessionError::Refused { reason: error.to_string() })?;
                handle.next().await
            }
            request = handle.next() => request,
        }
        .ok_or_else(|| SessionError::Refused {
            reason: format!("{} did not open {service_id}", device.address()),
        })?;

        let described = self.describe(request.device()).await?;
        let stream = request.accept().map_err(SessionError::from_connect_io)?;
        debug!("RFCOMM client connected");
        Ok(Socket::new(described, service_id, stream))
    }
}
