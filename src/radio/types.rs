use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use btsession_macros::PlatformValue;
use serde::Serialize;
use serde_with::SerializeDisplay;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

use crate::error::AddressParseError;

/// Serial Port Profile service id used when no other service is configured.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

/// A Bluetooth device address, displayed as `XX:XX:XX:XX:XX:XX`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay)]
pub struct Address([u8; 6]);

impl Address {
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(AddressParseError::InvalidLength {
                value: value.to_string(),
            });
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(AddressParseError::InvalidOctet {
                    value: value.to_string(),
                });
            }
            hex::decode_to_slice(part, std::slice::from_mut(octet)).map_err(|_| {
                AddressParseError::InvalidOctet {
                    value: value.to_string(),
                }
            })?;
        }
        Ok(Self(octets))
    }
}

/// Pairing state of a remote device.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Default, PlatformValue, Display, EnumIter, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BondState {
    #[default]
    #[platform(code = 10)]
    None,
    #[platform(code = 11)]
    Bonding,
    #[platform(code = 12)]
    Bonded,
}

/// How the core learned about a device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceOrigin {
    #[default]
    Discovered,
    Bonded,
}

/// A remote classic-Bluetooth device.
///
/// Identity is the address: two values with the same address compare equal
/// regardless of name, bond state or origin.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    address: Address,
    name: Option<String>,
    bond_state: BondState,
    origin: DeviceOrigin,
}

impl Device {
    /// Creates a discovered device with no name and no bond.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            bond_state: BondState::None,
            origin: DeviceOrigin::Discovered,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_bond_state(mut self, bond_state: BondState) -> Self {
        self.bond_state = bond_state;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: DeviceOrigin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the advertised name. It may be absent or empty.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn bond_state(&self) -> BondState {
        self.bond_state
    }

    #[must_use]
    pub fn origin(&self) -> DeviceOrigin {
        self.origin
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Power state of the local adapter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PlatformValue, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdapterState {
    #[platform(code = 10)]
    Off,
    #[platform(code = 11)]
    TurningOn,
    #[platform(code = 12)]
    On,
    #[platform(code = 13)]
    TurningOff,
}

/// Inquiry and page scan mode of the local adapter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PlatformValue, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanMode {
    #[platform(code = 20)]
    None,
    #[platform(code = 21)]
    Connectable,
    #[platform(code = 23)]
    ConnectableDiscoverable,
}

/// Discovery lifecycle phases.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PlatformValue, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscoveryPhase {
    #[platform(action = "android.bluetooth.adapter.action.DISCOVERY_STARTED")]
    Started,
    #[platform(action = "android.bluetooth.adapter.action.DISCOVERY_FINISHED")]
    Finished,
}

/// Link-layer (ACL) actions.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PlatformValue, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AclAction {
    #[platform(action = "android.bluetooth.device.action.ACL_CONNECTED")]
    Connected,
    #[platform(action = "android.bluetooth.device.action.ACL_DISCONNECT_REQUESTED")]
    DisconnectRequested,
    #[platform(action = "android.bluetooth.device.action.ACL_DISCONNECTED")]
    Disconnected,
}

/// Profile-level connection state. `Connecting` and `Disconnecting` are transient.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PlatformValue, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[platform(code = 0)]
    Disconnected,
    #[platform(code = 1)]
    Connecting,
    #[platform(code = 2)]
    Connected,
    #[platform(code = 3)]
    Disconnecting,
}

/// Profiles whose proxy service can be observed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PlatformValue, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BluetoothProfile {
    #[platform(code = 1)]
    Headset,
    #[platform(code = 2)]
    A2dp,
    #[platform(code = 3)]
    Health,
    #[platform(code = 4)]
    HidHost,
    #[platform(code = 5)]
    Pan,
    #[platform(code = 7)]
    Gatt,
    #[platform(code = 8)]
    GattServer,
}

/// Whether a profile proxy is bound.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    Connected,
    Disconnected,
}

/// Result of a user-facing request to enable the adapter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnableOutcome {
    Enabled,
    Declined,
}

/// A bond-state transition for one device.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct BondEvent {
    pub device: Device,
    pub state: BondState,
    pub previous: Option<BondState>,
}

/// A link-layer connectivity change for one device.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct AclEvent {
    pub device: Device,
    pub action: AclAction,
}

/// A profile connection-state transition for one device.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ConnectionStateEvent {
    pub device: Device,
    pub state: ConnectionState,
    pub previous: Option<ConnectionState>,
}

/// A profile proxy connect or disconnect.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ProfileEvent {
    pub profile: BluetoothProfile,
    pub state: ServiceState,
    pub connected_devices: Vec<Device>,
}

/// Service UUIDs reported by SDP, in platform order.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceUuids {
    device: Device,
    uuids: Vec<Uuid>,
}

impl ServiceUuids {
    pub(crate) fn new(device: Device, uuids: Vec<Uuid>) -> Self {
        Self { device, uuids }
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub fn uuids(&self) -> &[Uuid] {
        &self.uuids
    }

    /// Returns the first reported UUID.
    ///
    /// This is a convenience heuristic: SDP order does not say which record is
    /// the service the caller wants, so check the list when more than one
    /// service is advertised. BlueZ reports an unordered set, which the
    /// backend sorts, so there "first" means the lowest UUID.
    #[must_use]
    pub fn first(&self) -> Option<Uuid> {
        self.uuids.first().copied()
    }

    #[must_use]
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.uuids.contains(uuid)
    }
}
