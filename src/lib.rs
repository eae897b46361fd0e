//! Asynchronous Bluetooth session engine.
//!
//! A [`BluetoothSession`] wraps a [`RadioDriver`] and exposes discovery,
//! adapter, bond and profile events as multicast streams, SDP service lookup,
//! RFCOMM socket negotiation, and line-oriented duplex connections.

mod app;
mod cli;
mod config;
mod error;
mod radio;
mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RunSettings, radio_driver, run, run_with_clients};
pub use cli::{
    AdapterArgs, Args, Command, ConnectArgs, FakeArgs, LogLevel, OutputFormat, ScanArgs,
    ServeArgs, UuidsArgs, WatchArgs,
};
pub use config::SessionConfig;
pub use error::{AddressParseError, ConfigError, FixtureError, SessionError};
pub use radio::{
    AclAction, AclEvent, AdapterState, Address, BluetoothProfile, BondEvent, BondState,
    BroadcastCategory, BroadcastSink, ConnectionState, ConnectionStateEvent, Device,
    DeviceOrigin, DiscoveryPhase, EnableOutcome, FakePeer, FakeRadio, FakeRadioConfig,
    PeerFixture, ProfileEvent, RadioDriver, RawBroadcast, Registration, RfcommStream, SPP_UUID,
    ScanFixture, ScanMode, SdpFixture, SdpReply, ServerEndpoint, ServerRequest, ServiceState,
    ServiceUuids, Socket,
};
pub use session::{
    AdapterStateTracker, AlwaysGranted, BluetoothSession, BondController, DiscoveryController,
    DiscoveryPermission, DuplexConnection, EventStream, Executors, Negotiation, NegotiationState,
    ProfileConnectionTracker, ReadStream, SocketNegotiator, UuidResolver,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
