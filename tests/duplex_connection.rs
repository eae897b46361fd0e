use std::sync::Arc;

use assert_matches::assert_matches;
use btsession::{
    Address, BluetoothSession, Device, DuplexConnection, FakeRadio, FakeRadioConfig, SPP_UUID,
    SessionConfig, SessionError,
};
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;

const PEER: &str = "AA:BB:CC:DD:EE:01";

async fn connect(behaviour: &str, config: SessionConfig) -> anyhow::Result<DuplexConnection> {
    let radio = FakeRadio::new(
        FakeRadioConfig::builder()
            .peers(vec![format!("{PEER}={behaviour}").parse()?])
            .build(),
    );
    let session = BluetoothSession::builder()
        .driver(Arc::new(radio))
        .config(config)
        .build()?;
    let address: Address = PEER.parse()?;
    let socket = session
        .negotiator()
        .connect_as_client(&Device::new(address), SPP_UUID, true)?
        .await?;
    Ok(session.open_connection(socket)?)
}

#[tokio::test]
async fn echoed_bytes_arrive_in_order() -> anyhow::Result<()> {
    let connection = connect("echo", SessionConfig::default()).await?;
    let bytes = connection.observe_bytes();

    connection.send("hello\n").await?;

    let received = bytes.take(6).collect::<Result<Vec<u8>, _>>().await?;
    assert_eq!(b"hello\n".to_vec(), received);
    Ok(())
}

#[tokio::test]
async fn echoed_text_comes_back_as_a_line_without_its_newline() -> anyhow::Result<()> {
    let connection = connect("echo", SessionConfig::default()).await?;
    let mut lines = connection.observe_lines();

    connection.send("hello\n").await?;

    assert_eq!(Some("hello".to_string()), lines.next().await.transpose()?);
    Ok(())
}

#[tokio::test]
async fn scripted_peer_lines_end_with_the_peer_hangup() -> anyhow::Result<()> {
    let connection = connect("script:first/second/third", SessionConfig::default()).await?;

    let lines = connection
        .observe_lines()
        .collect::<Result<Vec<String>, _>>()
        .await?;

    assert_eq!(vec!["first", "second", "third"], lines);
    Ok(())
}

#[tokio::test]
async fn custom_delimiters_split_lines() -> anyhow::Result<()> {
    let config = SessionConfig::builder().line_delimiters(vec![b';']).build();
    let connection = connect("echo", config).await?;
    let lines = connection.observe_lines();

    connection.send("a;b;;c;").await?;

    let received = lines.take(3).collect::<Result<Vec<String>, _>>().await?;
    assert_eq!(vec!["a", "b", "c"], received);
    Ok(())
}

#[tokio::test]
async fn closed_connection_rejects_sends_and_ends_views() -> anyhow::Result<()> {
    let connection = connect("echo", SessionConfig::default()).await?;
    let clone = connection.clone();

    connection.close().await;
    connection.close().await;

    assert!(clone.is_closed());
    assert_matches!(clone.send("late").await, Err(SessionError::IoFailure(_)));
    assert_eq!(None, clone.observe_lines().next().await.transpose()?);
    Ok(())
}
