mod backend;
#[cfg(feature = "bluez")]
mod bluez_backend;
mod driver;
mod fake_backend;
mod types;

pub(crate) use self::backend::{RadioBackend, driver_from_backend};
pub use self::driver::{
    BroadcastCategory, BroadcastSink, RadioDriver, RawBroadcast, Registration, RfcommStream,
    ServerEndpoint, ServerRequest, Socket,
};
pub use self::fake_backend::{
    FakePeer, FakeRadio, FakeRadioConfig, PeerFixture, ScanFixture, SdpFixture, SdpReply,
};
pub use self::types::{
    AclAction, AclEvent, AdapterState, Address, BluetoothProfile, BondEvent, BondState,
    ConnectionState, ConnectionStateEvent, Device, DeviceOrigin, DiscoveryPhase, EnableOutcome,
    ProfileEvent, SPP_UUID, ScanMode, ServiceState, ServiceUuids,
};
