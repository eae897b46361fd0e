use assert_matches::assert_matches;
use clap::Parser;
use clap::error::ErrorKind;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

const HC05: &str = "AA:BB:CC:DD:EE:01";
const SCAN: &str = "AA:BB:CC:DD:EE:01|HC-05|none;AA:BB:CC:DD:EE:02|-|bonded";

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl btsession::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(
    args: btsession::Args,
    output: btsession::OutputFormat,
) -> anyhow::Result<String> {
    let mut out = Vec::new();
    let config = args.session_config()?;
    let (command, maybe_fake_args) = args.into_command_and_fake_args();
    let driver = btsession::radio_driver(maybe_fake_args).await?;
    let settings = btsession::RunSettings::builder()
        .output(output)
        .config(config)
        .build();
    btsession::run_with_clients(command, &mut out, &FakeTerminalClient, driver, settings).await?;
    Ok(String::from_utf8(out)?)
}

async fn run_json<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let args = btsession::Args::try_parse_from(argv)?;
    run_with_parsed_args(args, btsession::OutputFormat::Json).await
}

#[tokio::test]
async fn bonded_command_prints_a_device_table() -> anyhow::Result<()> {
    let fake = btsession::FakeArgs::builder().scan(SCAN)?.build();
    let args = btsession::Args::new(btsession::Command::Bonded).with_fake(fake);

    let stdout = run_with_parsed_args(args, btsession::OutputFormat::Pretty).await?;

    assert_snapshot!(stdout.trim_end(), @r"
    ╭───────────────────┬─────────┬────────╮
    │ address           │ name    │ bond   │
    ├───────────────────┼─────────┼────────┤
    │ AA:BB:CC:DD:EE:02 │ NO NAME │ bonded │
    ╰───────────────────┴─────────┴────────╯
    ");
    Ok(())
}

#[tokio::test]
async fn bonded_command_reports_an_empty_list() -> anyhow::Result<()> {
    let fake = btsession::FakeArgs::builder()
        .scan("AA:BB:CC:DD:EE:01|HC-05|none")?
        .build();
    let args = btsession::Args::new(btsession::Command::Bonded).with_fake(fake);

    let stdout = run_with_parsed_args(args, btsession::OutputFormat::Pretty).await?;

    assert_eq!("No bonded devices.\n", stdout);
    Ok(())
}

#[tokio::test]
async fn scan_command_lists_each_device_once() -> anyhow::Result<()> {
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        "AA:BB:CC:DD:EE:01|HC-05|none;AA:BB:CC:DD:EE:02|-|bonded;AA:BB:CC:DD:EE:01|HC-05|none",
        "scan",
        "--timeout",
        "2s",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"address":"AA:BB:CC:DD:EE:01","name":"HC-05","bond_state":"none","origin":"discovered"}
    {"address":"AA:BB:CC:DD:EE:02","name":null,"bond_state":"bonded","origin":"bonded"}
    "#);
    Ok(())
}

#[tokio::test]
async fn uuids_command_prints_services_in_reported_order() -> anyhow::Result<()> {
    let sdp = format!(
        "{HC05}=0000110a-0000-1000-8000-00805f9b34fb,00001101-0000-1000-8000-00805f9b34fb"
    );
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        SCAN,
        "--fake-sdp",
        &sdp,
        "uuids",
        HC05,
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"{"device":{"address":"AA:BB:CC:DD:EE:01","name":"HC-05","bond_state":"none","origin":"discovered"},"uuids":["0000110a-0000-1000-8000-00805f9b34fb","00001101-0000-1000-8000-00805f9b34fb"]}"#);
    Ok(())
}

#[tokio::test]
async fn uuids_command_times_out_when_sdp_stays_silent() -> anyhow::Result<()> {
    let result = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        SCAN,
        "--uuid-timeout",
        "50ms",
        "uuids",
        HC05,
    ])
    .await;

    let error = result.expect_err("a silent SDP lookup should time out");
    assert_matches!(
        error.downcast_ref::<btsession::SessionError>(),
        Some(btsession::SessionError::Timeout { .. })
    );
    Ok(())
}

#[tokio::test]
async fn connect_command_records_an_echo_transcript() -> anyhow::Result<()> {
    let peer = format!("{HC05}=echo");
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        SCAN,
        "--fake-peer",
        &peer,
        "connect",
        HC05,
        "--send",
        "ping",
        "--send",
        "pong",
        "--max-lines",
        "2",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"connected","device":{"address":"AA:BB:CC:DD:EE:01","name":"HC-05","bond_state":"none","origin":"discovered"},"service_id":"00001101-0000-1000-8000-00805f9b34fb"}
    {"event":"sent","line":"ping"}
    {"event":"sent","line":"pong"}
    {"event":"received","line":"ping"}
    {"event":"received","line":"pong"}
    {"event":"closed","received":2}
    "#);
    Ok(())
}

#[tokio::test]
async fn connect_command_pairs_before_dialling() -> anyhow::Result<()> {
    let peer = format!("{HC05}=script:ready");
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        SCAN,
        "--fake-peer",
        &peer,
        "connect",
        HC05,
        "--pair",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"connected","device":{"address":"AA:BB:CC:DD:EE:01","name":"HC-05","bond_state":"bonded","origin":"bonded"},"service_id":"00001101-0000-1000-8000-00805f9b34fb"}
    {"event":"received","line":"ready"}
    {"event":"closed","received":1}
    "#);
    Ok(())
}

#[tokio::test]
async fn serve_command_accepts_the_incoming_peer() -> anyhow::Result<()> {
    let peer = format!("{HC05}=script:hello/bye");
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        SCAN,
        "--fake-peer",
        &peer,
        "--fake-incoming",
        HC05,
        "serve",
        "--name",
        "chat",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {"event":"connected","device":{"address":"AA:BB:CC:DD:EE:01","name":"HC-05","bond_state":"none","origin":"discovered"},"service_id":"00001101-0000-1000-8000-00805f9b34fb"}
    {"event":"received","line":"hello"}
    {"event":"received","line":"bye"}
    {"event":"closed","received":2}
    "#);
    Ok(())
}

#[tokio::test]
async fn watch_command_reports_a_scan() -> anyhow::Result<()> {
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        "AA:BB:CC:DD:EE:01|HC-05|none",
        "watch",
        "--scan",
        "--max-events",
        "3",
    ])
    .await?;

    let mut lines: Vec<&str> = stdout.lines().collect();
    lines.sort_unstable();
    assert_snapshot!(lines.join("\n"), @r#"
    {"event":"device_found","device":{"address":"AA:BB:CC:DD:EE:01","name":"HC-05","bond_state":"none","origin":"discovered"}}
    {"event":"discovery","phase":"finished"}
    {"event":"discovery","phase":"started"}
    "#);
    Ok(())
}

#[tokio::test]
async fn adapter_command_enables_a_powered_off_adapter() -> anyhow::Result<()> {
    let stdout = run_json([
        "btsession",
        "--fake",
        "--fake-adapter-off",
        "adapter",
        "--enable",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"{"available":true,"state":"on","enable":"enabled"}"#);
    Ok(())
}

#[tokio::test]
async fn commands_fail_while_the_adapter_is_off() -> anyhow::Result<()> {
    let result = run_json([
        "btsession",
        "--fake",
        "--fake-scan",
        SCAN,
        "--fake-adapter-off",
        "bonded",
    ])
    .await;

    let error = result.expect_err("listing bonds needs the adapter on");
    assert_eq!(
        "the Bluetooth adapter must be on to list bonded devices",
        error.to_string()
    );
    Ok(())
}

#[tokio::test]
async fn refused_connection_is_reported() -> anyhow::Result<()> {
    let peer = format!("{HC05}=refuse");
    let result = run_json([
        "btsession",
        "--fake",
        "--fake-peer",
        &peer,
        "connect",
        HC05,
    ])
    .await;

    let error = result.expect_err("a refusing peer should fail the command");
    assert_matches!(
        error.downcast_ref::<btsession::SessionError>(),
        Some(btsession::SessionError::Refused { .. })
    );
    Ok(())
}

#[test]
fn fake_fixtures_require_the_fake_flag() {
    let result = btsession::Args::try_parse_from([
        "btsession",
        "--fake-scan",
        "AA:BB:CC:DD:EE:01|HC-05|none",
        "scan",
    ]);

    let error = result.expect_err("fixtures without --fake should be rejected");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}

#[test]
fn malformed_scan_fixture_is_rejected() {
    let result = btsession::FakeArgs::builder().scan("invalid-record");
    assert_matches!(
        result,
        Err(btsession::FixtureError::InvalidRecordFieldCount)
    );
}
