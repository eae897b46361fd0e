use std::collections::HashMap;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bon::Builder;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::driver::{
    BroadcastCategory, BroadcastSink, RadioDriver, RawBroadcast, Registration, ServerEndpoint,
    ServerRequest, Socket,
};
use super::types::{
    Address, AdapterState, BondState, Device, DeviceOrigin, DiscoveryPhase, EnableOutcome,
    ScanMode,
};
use crate::error::{FixtureError, SessionError};

const PIPE_CAPACITY: usize = 4096;

/// Parsed fake discovery fixture: `ADDR|name|bond;...`.
///
/// A name of `-` means the device advertises no name. Bond is one of
/// `none`, `bonding` or `bonded`.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<Device>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }

        let devices = value
            .split(';')
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

/// A canned SDP reply for one device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SdpReply {
    Uuids(Vec<Uuid>),
    Failure,
}

/// Parsed fake SDP fixture: `ADDR=uuid,uuid;ADDR=fail`.
///
/// Devices missing from the fixture never answer.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct SdpFixture {
    replies: HashMap<Address, SdpReply>,
}

impl FromStr for SdpFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }

        let replies = value
            .split(';')
            .map(|entry| -> Result<(Address, SdpReply), FixtureError> {
                let (address, reply) = split_assignment(entry)?;
                let reply = if reply.eq_ignore_ascii_case("fail") {
                    SdpReply::Failure
                } else {
                    SdpReply::Uuids(
                        reply
                            .split(',')
                            .map(|uuid| Uuid::parse_str(uuid.trim()))
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                };
                Ok((address, reply))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { replies })
    }
}

/// How a fake remote peer behaves once a socket reaches it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakePeer {
    /// Accepts and leaves the peer end for the caller to drive.
    Accept,
    /// Writes back every byte it receives.
    Echo,
    /// Sends each line terminated by CRLF, then hangs up.
    Script(Vec<String>),
    /// Rejects every dial.
    Refuse,
    /// Never answers a dial.
    Unreachable,
}

/// Parsed peer fixture: `ADDR=echo`, `ADDR=refuse`, `ADDR=script:a/b`.
#[derive(Debug, Clone, derive_more::Into)]
pub struct PeerFixture {
    peer: (Address, FakePeer),
}

impl FromStr for PeerFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (address, behaviour) = split_assignment(value)?;
        let behaviour = match behaviour.to_ascii_lowercase().as_str() {
            "accept" => FakePeer::Accept,
            "echo" => FakePeer::Echo,
            "refuse" => FakePeer::Refuse,
            "unreachable" => FakePeer::Unreachable,
            _ => match behaviour.split_once(':') {
                Some((kind, lines)) if kind.eq_ignore_ascii_case("script") => {
                    FakePeer::Script(lines.split('/').map(ToString::to_string).collect())
                }
                _ => {
                    return Err(FixtureError::InvalidPeerBehaviour {
                        value: behaviour.to_string(),
                    });
                }
            },
        };
        Ok(Self {
            peer: (address, behaviour),
        })
    }
}

/// Settings for constructing a fake radio.
#[derive(Debug, Clone, Builder)]
pub struct FakeRadioConfig {
    #[builder(default)]
    scan: ScanFixture,
    #[builder(default)]
    sdp: SdpFixture,
    #[builder(default)]
    peers: Vec<PeerFixture>,
    /// Peer that connects as soon as a listener opens.
    incoming: Option<Address>,
    #[builder(default)]
    adapter_off: bool,
    #[builder(default)]
    unavailable: bool,
    /// Whether a scan reports `Finished` right after the last device.
    #[builder(default = true)]
    finish_discovery: bool,
    #[builder(default = EnableOutcome::Enabled)]
    enable_outcome: EnableOutcome,
}

#[derive(Debug)]
struct FakeListener {
    id: u64,
    sender: mpsc::Sender<Socket>,
}

#[derive(Debug, Default)]
struct Counters {
    active: usize,
    total: usize,
}

#[derive(Debug)]
struct FakeState {
    available: bool,
    adapter: AdapterState,
    discovering: bool,
    finish_discovery: bool,
    enable_outcome: EnableOutcome,
    devices: Vec<Device>,
    sdp: HashMap<Address, SdpReply>,
    peers: HashMap<Address, FakePeer>,
    incoming: Option<Address>,
    sinks: HashMap<BroadcastCategory, Vec<(u64, BroadcastSink)>>,
    registrations: HashMap<BroadcastCategory, Counters>,
    listeners: HashMap<Uuid, FakeListener>,
    parked_peers: HashMap<Address, DuplexStream>,
    pending_dials: usize,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&self, broadcast: RawBroadcast) -> usize {
        let Some(category) = broadcast.category() else {
            return 0;
        };
        let Some(sinks) = self.sinks.get(&category) else {
            trace!(%category, "no fake listener for broadcast");
            return 0;
        };

        sinks
            .iter()
            .filter(|(_, sink)| sink.deliver(broadcast.clone()))
            .count()
    }

    fn emit_discovery(&self, phase: DiscoveryPhase) {
        self.emit(RawBroadcast::Discovery {
            action: phase.action().to_string(),
        });
    }

    fn known_device(&self, address: &Address) -> Device {
        self.devices
            .iter()
            .find(|device| device.address() == address)
            .cloned()
            .unwrap_or_else(|| Device::new(*address))
    }
}

/// In-memory radio used in tests and non-hardware environments.
///
/// Clones share state, so a test can keep one handle to inject broadcasts
/// while the session owns another.
#[derive(Debug, Clone)]
pub struct FakeRadio {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRadio {
    #[must_use]
    pub fn new(config: FakeRadioConfig) -> Self {
        let devices: Vec<Device> = config.scan.into();
        let devices = devices
            .into_iter()
            .map(|device| {
                if device.bond_state() == BondState::Bonded {
                    device.with_origin(DeviceOrigin::Bonded)
                } else {
                    device
                }
            })
            .collect();
        let state = FakeState {
            available: !config.unavailable,
            adapter: if config.adapter_off {
                AdapterState::Off
            } else {
                AdapterState::On
            },
            discovering: false,
            finish_discovery: config.finish_discovery,
            enable_outcome: config.enable_outcome,
            devices,
            sdp: config.sdp.into(),
            peers: config
                .peers
                .into_iter()
                .map(<(Address, FakePeer)>::from)
                .collect(),
            incoming: config.incoming,
            sinks: HashMap::new(),
            registrations: HashMap::new(),
            listeners: HashMap::new(),
            parked_peers: HashMap::new(),
            pending_dials: 0,
            next_id: 0,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        lock_state(&self.state)
    }

    /// Delivers a raw broadcast to every registered listener of its category.
    /// Returns how many listeners received it.
    pub fn emit(&self, broadcast: RawBroadcast) -> usize {
        self.lock().emit(broadcast)
    }

    /// Changes the adapter power state and broadcasts it.
    ///
    /// Leaving `On` stops an active scan without a `Finished` broadcast, as
    /// real stacks do.
    pub fn set_adapter_state(&self, adapter: AdapterState) {
        let mut state = self.lock();
        state.adapter = adapter;
        if adapter != AdapterState::On {
            state.discovering = false;
        }
        state.emit(RawBroadcast::AdapterState {
            code: adapter.code(),
        });
    }

    pub fn set_scan_mode(&self, mode: ScanMode) {
        self.lock().emit(RawBroadcast::ScanMode { code: mode.code() });
    }

    /// Connects `device` to the listener for `service_id` and returns the
    /// peer end of the socket.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Refused`] when nothing listens on the service.
    pub fn simulate_incoming(
        &self,
        device: &Device,
        service_id: Uuid,
    ) -> Result<DuplexStream, SessionError> {
        let state = self.lock();
        let listener = state
            .listeners
            .get(&service_id)
            .ok_or_else(|| SessionError::Refused {
                reason: format!("nothing listens on {service_id}"),
            })?;

        let (local, peer) = tokio::io::duplex(PIPE_CAPACITY);
        listener
            .sender
            .try_send(Socket::new(device.clone(), service_id, local))
            .map_err(|_| SessionError::Refused {
                reason: "listener backlog is full".to_string(),
            })?;
        Ok(peer)
    }

    /// Drops the sinks of `category` as if the platform watch behind them
    /// died. Registrations stay counted until the session releases them.
    pub fn stop_delivering(&self, category: BroadcastCategory) {
        self.lock().sinks.remove(&category);
    }

    /// Takes the peer end parked by an `accept` peer.
    pub fn take_peer(&self, address: &Address) -> Option<DuplexStream> {
        self.lock().parked_peers.remove(address)
    }

    pub fn active_registrations(&self, category: BroadcastCategory) -> usize {
        self.lock()
            .registrations
            .get(&category)
            .map_or(0, |counters| counters.active)
    }

    pub fn total_registrations(&self, category: BroadcastCategory) -> usize {
        self.lock()
            .registrations
            .get(&category)
            .map_or(0, |counters| counters.total)
    }

    pub fn open_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn pending_dials(&self) -> usize {
        self.lock().pending_dials
    }

    fn attach_peer(&self, address: Address, behaviour: FakePeer, peer: DuplexStream) {
        match behaviour {
            FakePeer::Echo => {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = tokio::io::split(peer);
                    if let Err(error) = tokio::io::copy(&mut reader, &mut writer).await {
                        debug!(%address, %error, "fake echo peer stopped");
                    }
                });
            }
            FakePeer::Script(lines) => {
                tokio::spawn(async move {
                    if let Err(error) = play_script(peer, &lines).await {
                        debug!(%address, %error, "fake script peer stopped");
                    }
                });
            }
            FakePeer::Accept | FakePeer::Refuse | FakePeer::Unreachable => {
                self.lock().parked_peers.insert(address, peer);
            }
        }
    }
}

fn lock_state(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn play_script(mut peer: DuplexStream, lines: &[String]) -> io::Result<()> {
    for line in lines {
        peer.write_all(line.as_bytes()).await?;
        peer.write_all(b"\r\n").await?;
    }
    peer.shutdown().await
}

struct PendingDial {
    state: Arc<Mutex<FakeState>>,
}

impl PendingDial {
    fn new(state: Arc<Mutex<FakeState>>) -> Self {
        lock_state(&state).pending_dials += 1;
        Self { state }
    }
}

impl Drop for PendingDial {
    fn drop(&mut self) {
        lock_state(&self.state).pending_dials -= 1;
    }
}

struct FakeEndpoint {
    id: u64,
    service_id: Uuid,
    receiver: mpsc::Receiver<Socket>,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl ServerEndpoint for FakeEndpoint {
    async fn accept(&mut self) -> Result<Socket, SessionError> {
        self.receiver
            .recv()
            .await
            .ok_or_else(SessionError::connection_closed)
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        Ok(())
    }
}

impl Drop for FakeEndpoint {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        if state
            .listeners
            .get(&self.service_id)
            .is_some_and(|listener| listener.id == self.id)
        {
            state.listeners.remove(&self.service_id);
            debug!(service_id = %self.service_id, "fake listener closed");
        }
    }
}

#[async_trait]
impl RadioDriver for FakeRadio {
    fn is_available(&self) -> bool {
        self.lock().available
    }

    async fn adapter_state(&self) -> Result<AdapterState, SessionError> {
        Ok(self.lock().adapter)
    }

    async fn request_enable(&self) -> Result<EnableOutcome, SessionError> {
        let outcome = self.lock().enable_outcome;
        if outcome == EnableOutcome::Enabled && self.lock().adapter != AdapterState::On {
            self.set_adapter_state(AdapterState::TurningOn);
            self.set_adapter_state(AdapterState::On);
        }
        Ok(outcome)
    }

    async fn start_discovery(&self) -> Result<bool, SessionError> {
        let mut state = self.lock();
        if state.discovering || state.adapter != AdapterState::On {
            return Ok(false);
        }

        state.discovering = true;
        state.emit_discovery(DiscoveryPhase::Started);
        for device in &state.devices {
            state.emit(RawBroadcast::DeviceFound {
                device: device.clone(),
            });
        }
        if state.finish_discovery {
            state.discovering = false;
            state.emit_discovery(DiscoveryPhase::Finished);
        }
        info!(devices = state.devices.len(), "fake discovery started");
        Ok(true)
    }

    async fn cancel_discovery(&self) -> Result<bool, SessionError> {
        let mut state = self.lock();
        if !state.discovering {
            return Ok(false);
        }

        state.discovering = false;
        state.emit_discovery(DiscoveryPhase::Finished);
        Ok(true)
    }

    async fn is_discovering(&self) -> Result<bool, SessionError> {
        Ok(self.lock().discovering)
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>, SessionError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|device| device.bond_state() == BondState::Bonded)
            .cloned()
            .collect())
    }

    async fn create_bond(&self, device: &Device) -> Result<bool, SessionError> {
        let mut state = self.lock();
        let current = state.known_device(device.address());
        if current.bond_state() != BondState::None {
            return Ok(false);
        }

        let bonding = current.with_bond_state(BondState::Bonding);
        state.emit(RawBroadcast::BondState {
            device: bonding.clone(),
            code: BondState::Bonding.code(),
            previous_code: Some(BondState::None.code()),
        });
        let bonded = bonding
            .with_bond_state(BondState::Bonded)
            .with_origin(DeviceOrigin::Bonded);
        state.emit(RawBroadcast::BondState {
            device: bonded.clone(),
            code: BondState::Bonded.code(),
            previous_code: Some(BondState::Bonding.code()),
        });

        state.devices.retain(|known| known != &bonded);
        state.devices.push(bonded);
        Ok(true)
    }

    async fn fetch_uuids(&self, device: &Device) -> Result<bool, SessionError> {
        let state = self.lock();
        if state.adapter != AdapterState::On {
            return Ok(false);
        }

        let device = state.known_device(device.address());
        match state.sdp.get(device.address()) {
            Some(SdpReply::Uuids(uuids)) => {
                state.emit(RawBroadcast::ServiceUuids {
                    device,
                    uuids: Some(uuids.clone()),
                });
            }
            Some(SdpReply::Failure) => {
                state.emit(RawBroadcast::ServiceUuids { device, uuids: None });
            }
            None => debug!(address = %device.address(), "fake SDP stays silent"),
        }
        Ok(true)
    }

    fn register(
        &self,
        category: BroadcastCategory,
        sink: BroadcastSink,
    ) -> Result<Registration, SessionError> {
        let mut state = self.lock();
        if !state.available {
            return Err(SessionError::Unsupported);
        }

        let id = state.next_id();
        state.sinks.entry(category).or_default().push((id, sink));
        let counters = state.registrations.entry(category).or_default();
        counters.active += 1;
        counters.total += 1;
        debug!(%category, "fake listener registered");

        let shared = Arc::clone(&self.state);
        Ok(Registration::new(move || {
            let mut state = lock_state(&shared);
            if let Some(sinks) = state.sinks.get_mut(&category) {
                sinks.retain(|(sink_id, _)| *sink_id != id);
            }
            if let Some(counters) = state.registrations.get_mut(&category) {
                counters.active -= 1;
            }
            debug!(%category, "fake listener released");
        }))
    }

    async fn listen(
        &self,
        request: &ServerRequest,
    ) -> Result<Box<dyn ServerEndpoint>, SessionError> {
        let (sender, receiver) = mpsc::channel(1);
        let (id, incoming) = {
            let mut state = self.lock();
            if state.listeners.contains_key(&request.service_id) {
                return Err(SessionError::IoFailure(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} is already being served", request.service_id),
                )));
            }
            let id = state.next_id();
            state.listeners.insert(request.service_id, FakeListener { id, sender });
            let incoming = state.incoming.map(|address| {
                let behaviour = state
                    .peers
                    .get(&address)
                    .cloned()
                    .unwrap_or(FakePeer::Accept);
                (state.known_device(&address), behaviour)
            });
            (id, incoming)
        };
        info!(name = %request.service_name, service_id = %request.service_id, "fake listener open");

        let endpoint = FakeEndpoint {
            id,
            service_id: request.service_id,
            receiver,
            state: Arc::clone(&self.state),
        };
        if let Some((device, behaviour)) = incoming {
            let peer = self.simulate_incoming(&device, request.service_id)?;
            self.attach_peer(*device.address(), behaviour, peer);
        }
        Ok(Box::new(endpoint))
    }

    async fn dial(
        &self,
        device: &Device,
        service_id: Uuid,
        _secure: bool,
    ) -> Result<Socket, SessionError> {
        let (remote, behaviour) = {
            let state = self.lock();
            let behaviour = state
                .peers
                .get(device.address())
                .cloned()
                .ok_or_else(|| SessionError::Refused {
                    reason: format!("{} is out of range", device.address()),
                })?;
            if let Some(SdpReply::Uuids(uuids)) = state.sdp.get(device.address())
                && !uuids.contains(&service_id)
            {
                return Err(SessionError::Refused {
                    reason: format!("{} does not offer {service_id}", device.address()),
                });
            }
            (state.known_device(device.address()), behaviour)
        };

        match behaviour {
            FakePeer::Refuse => Err(SessionError::Refused {
                reason: format!("{} refused the connection", remote.address()),
            }),
            FakePeer::Unreachable => {
                let _pending = PendingDial::new(Arc::clone(&self.state));
                std::future::pending::<Result<Socket, SessionError>>().await
            }
            behaviour => {
                let (local, peer) = tokio::io::duplex(PIPE_CAPACITY);
                self.attach_peer(*remote.address(), behaviour, peer);
                Ok(Socket::new(remote, service_id, local))
            }
        }
    }
}

fn split_assignment(entry: &str) -> Result<(Address, &str), FixtureError> {
    let (address, value) =
        entry
            .split_once('=')
            .ok_or_else(|| FixtureError::MissingAssignment {
                entry: entry.to_string(),
            })?;
    let value = value.trim();
    if value.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }
    Ok((address.parse()?, value))
}

fn parse_scan_record(raw_record: &str) -> Result<Device, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(FixtureError::InvalidRecordFieldCount);
    }
    if fields[0].is_empty() || fields[2].is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let bond_state = match fields[2].to_ascii_lowercase().as_str() {
        "none" => BondState::None,
        "bonding" => BondState::Bonding,
        "bonded" => BondState::Bonded,
        _ => {
            return Err(FixtureError::InvalidBondState {
                value: fields[2].to_string(),
            });
        }
    };

    let device = Device::new(fields[0].parse()?).with_bond_state(bond_state);
    Ok(if fields[1] == "-" {
        device
    } else {
        device.with_name(fields[1])
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::radio::types::SPP_UUID;

    fn address(value: &str) -> Address {
        value.parse().expect("test address should parse")
    }

    #[rstest]
    #[case("AA:BB:CC:DD:EE:01|HC-05|none", 1)]
    #[case("AA:BB:CC:DD:EE:01|HC-05|none;AA:BB:CC:DD:EE:02|-|bonded", 2)]
    fn scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let fixture: ScanFixture = fixture.parse().expect("fixture should parse");
        let devices: Vec<Device> = fixture.into();
        assert_eq!(expected_count, devices.len());
    }

    #[test]
    fn scan_fixture_dash_means_no_name() {
        let fixture: ScanFixture = "AA:BB:CC:DD:EE:01|-|bonded"
            .parse()
            .expect("fixture should parse");
        let devices: Vec<Device> = fixture.into();
        assert_eq!(None, devices[0].name());
        assert_eq!(BondState::Bonded, devices[0].bond_state());
    }

    #[rstest]
    #[case("AA:BB:CC:DD:EE:01|HC-05")]
    #[case("AA:BB:CC:DD:EE:01|HC-05|none|extra")]
    fn scan_fixture_rejects_invalid_field_count(#[case] fixture: &str) {
        assert_matches!(
            fixture.parse::<ScanFixture>(),
            Err(FixtureError::InvalidRecordFieldCount)
        );
    }

    #[test]
    fn scan_fixture_rejects_unknown_bond_state() {
        assert_matches!(
            "AA:BB:CC:DD:EE:01|HC-05|paired".parse::<ScanFixture>(),
            Err(FixtureError::InvalidBondState { .. })
        );
    }

    #[test]
    fn sdp_fixture_parses_uuid_lists_and_failures() {
        let fixture: SdpFixture = format!(
            "AA:BB:CC:DD:EE:01={SPP_UUID};AA:BB:CC:DD:EE:02=fail"
        )
        .parse()
        .expect("fixture should parse");
        let replies: HashMap<Address, SdpReply> = fixture.into();

        assert_eq!(
            Some(&SdpReply::Uuids(vec![SPP_UUID])),
            replies.get(&address("AA:BB:CC:DD:EE:01"))
        );
        assert_eq!(
            Some(&SdpReply::Failure),
            replies.get(&address("AA:BB:CC:DD:EE:02"))
        );
    }

    #[test]
    fn sdp_fixture_rejects_missing_assignment() {
        assert_matches!(
            "AA:BB:CC:DD:EE:01".parse::<SdpFixture>(),
            Err(FixtureError::MissingAssignment { .. })
        );
    }

    #[rstest]
    #[case("AA:BB:CC:DD:EE:01=echo", FakePeer::Echo)]
    #[case("AA:BB:CC:DD:EE:01=refuse", FakePeer::Refuse)]
    #[case(
        "AA:BB:CC:DD:EE:01=script:hello/world",
        FakePeer::Script(vec!["hello".to_string(), "world".to_string()])
    )]
    fn peer_fixture_parses_behaviours(#[case] fixture: &str, #[case] expected: FakePeer) {
        let fixture: PeerFixture = fixture.parse().expect("fixture should parse");
        let (_, behaviour): (Address, FakePeer) = fixture.into();
        assert_eq!(expected, behaviour);
    }

    #[test]
    fn peer_fixture_rejects_unknown_behaviour() {
        assert_matches!(
            "AA:BB:CC:DD:EE:01=teleport".parse::<PeerFixture>(),
            Err(FixtureError::InvalidPeerBehaviour { .. })
        );
    }

    #[test]
    fn registrations_are_counted_and_released() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().build());
        let (sender, _receiver) = mpsc::unbounded_channel();

        let registration = radio
            .register(BroadcastCategory::Acl, BroadcastSink::new(sender))
            .expect("registration should succeed");
        assert_eq!(1, radio.active_registrations(BroadcastCategory::Acl));

        drop(registration);
        assert_eq!(0, radio.active_registrations(BroadcastCategory::Acl));
        assert_eq!(1, radio.total_registrations(BroadcastCategory::Acl));
    }

    #[test]
    fn unavailable_radio_rejects_registration() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().unavailable(true).build());
        let (sender, _receiver) = mpsc::unbounded_channel();

        assert_matches!(
            radio.register(BroadcastCategory::Acl, BroadcastSink::new(sender)),
            Err(SessionError::Unsupported)
        );
    }

    #[tokio::test]
    async fn powering_off_mid_scan_clears_discovering_silently() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().finish_discovery(false).build());
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let _registration = radio
            .register(BroadcastCategory::Discovery, BroadcastSink::new(sender))
            .expect("registration should succeed");

        assert!(radio.start_discovery().await.expect("scan should start"));
        radio.set_adapter_state(AdapterState::Off);

        assert!(!radio.is_discovering().await.expect("query should succeed"));
        assert_eq!(
            Some(RawBroadcast::Discovery {
                action: DiscoveryPhase::Started.action().to_string()
            }),
            receiver.recv().await
        );
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn script_peer_sends_lines_then_hangs_up() {
        let remote = address("AA:BB:CC:DD:EE:01");
        let radio = FakeRadio::new(
            FakeRadioConfig::builder()
                .peers(vec![
                    "AA:BB:CC:DD:EE:01=script:one/two"
                        .parse()
                        .expect("fixture should parse"),
                ])
                .build(),
        );

        let socket = radio
            .dial(&Device::new(remote), SPP_UUID, true)
            .await
            .expect("dial should succeed");
        let (_, mut stream) = socket.into_parts();
        let mut received = String::new();
        stream
            .read_to_string(&mut received)
            .await
            .expect("script should be readable");

        assert_eq!("one\r\ntwo\r\n", received);
    }

    #[tokio::test]
    async fn dialing_unknown_device_is_refused() {
        let radio = FakeRadio::new(FakeRadioConfig::builder().build());
        let result = radio
            .dial(&Device::new(address("AA:BB:CC:DD:EE:09")), SPP_UUID, true)
            .await;
        assert_matches!(result, Err(SessionError::Refused { .. }));
    }

    #[tokio::test]
    async fn dialing_a_service_the_device_does_not_offer_is_refused() {
        let radio = FakeRadio::new(
            FakeRadioConfig::builder()
                .sdp(
                    format!("AA:BB:CC:DD:EE:01={SPP_UUID}")
                        .parse()
                        .expect("fixture should parse"),
                )
                .peers(vec![
                    "AA:BB:CC:DD:EE:01=echo".parse().expect("fixture should parse"),
                ])
                .build(),
        );
        let result = radio
            .dial(
                &Device::new(address("AA:BB:CC:DD:EE:01")),
                Uuid::from_u128(7),
                true,
            )
            .await;
        assert_matches!(result, Err(SessionError::Refused { .. }));
    }
}
