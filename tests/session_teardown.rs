use std::sync::Arc;

use assert_matches::assert_matches;
use btsession::{
    Address, BluetoothSession, BroadcastCategory, Device, FakeRadio, FakeRadioConfig, RadioDriver,
    SPP_UUID, SessionError,
};
use pretty_assertions::assert_eq;
use tokio::io::AsyncReadExt;
use tokio_stream::StreamExt;

const PEER: &str = "AA:BB:CC:DD:EE:01";

fn peer() -> Device {
    let address: Address = PEER.parse().expect("peer address should parse");
    Device::new(address)
}

#[tokio::test]
async fn shutdown_releases_everything_the_session_holds() -> anyhow::Result<()> {
    let radio = FakeRadio::new(
        FakeRadioConfig::builder()
            .peers(vec![format!("{PEER}=accept").parse()?])
            .finish_discovery(false)
            .build(),
    );
    let session = BluetoothSession::builder()
        .driver(Arc::new(radio.clone()))
        .build()?;

    let adapter_states = session.adapter().observe_state()?;
    let bonds = session.bonds().observe_bond_state()?;
    let socket = session
        .negotiator()
        .connect_as_client(&peer(), SPP_UUID, true)?
        .await?;
    let connection = session.open_connection(socket)?;
    let lines = connection.observe_lines();
    let mut peer_end = radio
        .take_peer(peer().address())
        .expect("accept peer should be parked");
    let listener = session
        .negotiator()
        .connect_as_server("idle", SPP_UUID, true)?;
    assert!(session.discovery().start_discovery().await?);

    session.shutdown().await;

    assert!(connection.is_closed());
    assert_eq!(0, lines.collect::<Vec<_>>().await.len());
    assert_eq!(0, adapter_states.collect::<Vec<_>>().await.len());
    assert_eq!(0, bonds.collect::<Vec<_>>().await.len());
    assert_matches!(listener.await, Err(SessionError::Cancelled));
    assert_eq!(0, radio.open_listeners());
    assert!(!radio.is_discovering().await?);
    assert_eq!(0, radio.active_registrations(BroadcastCategory::AdapterState));
    assert_eq!(0, radio.active_registrations(BroadcastCategory::BondState));

    let mut received = Vec::new();
    peer_end.read_to_end(&mut received).await?;
    assert!(received.is_empty());
    Ok(())
}

#[tokio::test]
async fn operations_after_shutdown_report_a_closed_session() -> anyhow::Result<()> {
    let radio = FakeRadio::new(FakeRadioConfig::builder().build());
    let session = BluetoothSession::builder()
        .driver(Arc::new(radio))
        .build()?;
    session.shutdown().await;

    assert_matches!(
        session.discovery().start_discovery().await,
        Err(SessionError::SessionClosed)
    );
    assert_matches!(
        session.uuids().resolve_uuids(&peer()).await,
        Err(SessionError::SessionClosed)
    );
    assert_matches!(
        session.profiles().observe_acl(),
        Err(SessionError::SessionClosed)
    );
    Ok(())
}
