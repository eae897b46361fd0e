use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::adapter::AdapterArgs;
use crate::cli::connect::ConnectArgs;
use crate::cli::scan::ScanArgs;
use crate::cli::serve::ServeArgs;
use crate::cli::uuids::UuidsArgs;
use crate::cli::watch::WatchArgs;
use crate::config::SessionConfig;
use crate::error::{ConfigError, FixtureError};
use crate::radio::{Address, FakeRadioConfig, PeerFixture, ScanFixture, SdpFixture};

/// Command-line options for the Bluetooth session tool.
#[derive(Debug, Parser)]
#[command(
    name = "btsession",
    about = "Discover, pair with and talk to classic Bluetooth devices."
)]
pub struct Args {
    /// Uses the in-memory radio instead of the system Bluetooth stack.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake discovery results in the form `address|name|bond;...`.
    #[arg(long, global = true, requires = "fake")]
    fake_scan: Option<ScanFixture>,
    /// Fake SDP replies in the form `address=uuid,uuid;address=fail`.
    #[arg(long, global = true, requires = "fake")]
    fake_sdp: Option<SdpFixture>,
    /// Fake peer behaviour, e.g. `address=echo` or `address=script:hi/bye`. Repeatable.
    #[arg(long = "fake-peer", global = true, requires = "fake")]
    fake_peers: Vec<PeerFixture>,
    /// Fake peer that connects as soon as a server starts listening.
    #[arg(long, global = true, requires = "fake")]
    fake_incoming: Option<Address>,
    /// Starts the fake adapter powered off.
    #[arg(long, global = true, requires = "fake")]
    fake_adapter_off: bool,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Log level, overriding `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Session configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// How long to wait for an SDP reply (e.g. `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    uuid_timeout: Option<Duration>,
    /// Give up dialling after this long.
    #[arg(long, global = true, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,
    /// Give up waiting for a peer after this long.
    #[arg(long, global = true, value_parser = parse_duration)]
    accept_timeout: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use btsession::{Args, Command};
    ///
    /// let args = Args::new(Command::Bonded);
    /// assert_eq!(None, args.output_format());
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            fake: false,
            fake_scan: None,
            fake_sdp: None,
            fake_peers: Vec::new(),
            fake_incoming: None,
            fake_adapter_off: false,
            output: None,
            log_level: None,
            config: None,
            uuid_timeout: None,
            connect_timeout: None,
            accept_timeout: None,
            command,
        }
    }

    /// Enables the fake radio with pre-parsed fixtures.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan,
            sdp,
            peers,
            incoming,
            adapter_off,
        } = fake;

        self.fake = true;
        self.fake_scan = scan;
        self.fake_sdp = sdp;
        self.fake_peers = peers;
        self.fake_incoming = incoming;
        self.fake_adapter_off = adapter_off;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    /// Loads the configuration file and applies the timeout flags on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut config = SessionConfig::load(self.config_path())?;
        if let Some(timeout) = self.uuid_timeout {
            config = config.with_uuid_timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        if let Some(timeout) = self.accept_timeout {
            config = config.with_accept_timeout(timeout);
        }
        Ok(config)
    }

    /// Splits parsed arguments into the command and optional fake radio settings.
    #[must_use]
    pub fn into_command_and_fake_args(self) -> (Command, Option<FakeArgs>) {
        let Args {
            fake,
            fake_scan,
            fake_sdp,
            fake_peers,
            fake_incoming,
            fake_adapter_off,
            command,
            ..
        } = self;

        let fake_args = fake.then(|| FakeArgs {
            scan: fake_scan,
            sdp: fake_sdp,
            peers: fake_peers,
            incoming: fake_incoming,
            adapter_off: fake_adapter_off,
        });
        (command, fake_args)
    }
}

/// Fake radio fixtures for programmatic runs.
///
/// ```
/// # fn demo() -> Result<(), btsession::FixtureError> {
/// let fake = btsession::FakeArgs::builder()
///     .scan("AA:BB:CC:DD:EE:01|HC-05|none")?
///     .peers(vec!["AA:BB:CC:DD:EE:01=echo".parse()?])
///     .build();
/// let _ = fake;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Builder)]
#[builder(derive(Debug))]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    scan: Option<ScanFixture>,
    #[builder(with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    sdp: Option<SdpFixture>,
    #[builder(default)]
    peers: Vec<PeerFixture>,
    #[builder(with = |value: &str| -> Result<_, FixtureError> { Ok(value.parse()?) })]
    incoming: Option<Address>,
    #[builder(default)]
    adapter_off: bool,
}

impl FakeArgs {
    pub(crate) fn into_radio_config(self) -> FakeRadioConfig {
        let Self {
            scan,
            sdp,
            peers,
            incoming,
            adapter_off,
        } = self;

        FakeRadioConfig::builder()
            .scan(scan.unwrap_or_default())
            .sdp(sdp.unwrap_or_default())
            .peers(peers)
            .maybe_incoming(incoming)
            .adapter_off(adapter_off)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show adapter availability and power state.
    Adapter(AdapterArgs),
    /// List bonded devices.
    Bonded,
    /// Run one discovery scan and list the devices found.
    Scan(ScanArgs),
    /// Query the service UUIDs a device advertises over SDP.
    Uuids(UuidsArgs),
    /// Dial a device, send text, then print the lines it sends back.
    Connect(ConnectArgs),
    /// Wait for one incoming connection and print the lines it sends.
    Serve(ServeArgs),
    /// Print adapter, discovery, bond and link events as they happen.
    Watch(WatchArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Adapter(_) => "adapter",
            Self::Bonded => "bonded",
            Self::Scan(_) => "scan",
            Self::Uuids(_) => "uuids",
            Self::Connect(_) => "connect",
            Self::Serve(_) => "serve",
            Self::Watch(_) => "watch",
        }
    }
}

/// Rendering of command results.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables and text.
    Pretty,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_fixtures_require_fake_mode() {
        let result = Args::try_parse_from([
            "btsession",
            "--fake-scan",
            "AA:BB:CC:DD:EE:01|HC-05|none",
            "bonded",
        ]);

        let error = result.expect_err("--fake-scan should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn invalid_fixture_is_a_value_error() {
        let result = Args::try_parse_from(["btsession", "--fake", "--fake-scan", "nonsense", "bonded"]);

        let error = result.expect_err("malformed fixture should fail parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn peers_are_repeatable() {
        let args = Args::try_parse_from([
            "btsession",
            "--fake",
            "--fake-peer",
            "AA:BB:CC:DD:EE:01=echo",
            "--fake-peer",
            "AA:BB:CC:DD:EE:02=refuse",
            "bonded",
        ])
        .expect("repeated peers should parse");

        let (command, fake_args) = args.into_command_and_fake_args();
        assert_matches!(command, Command::Bonded);
        let fake_args = fake_args.expect("fake mode should produce fake settings");
        assert_eq!(2, fake_args.peers.len());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::try_parse_from([
            "btsession",
            "bonded",
            "--output",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("global flags should parse after the subcommand");

        assert_eq!(Some(OutputFormat::Json), args.output_format());
        assert_eq!(Some(LogLevel::Debug), args.log_level());
        assert_matches!(args.into_command_and_fake_args(), (Command::Bonded, None));
    }

    #[test]
    fn timeout_flags_override_the_configuration() {
        let args = Args::try_parse_from([
            "btsession",
            "--connect-timeout",
            "750ms",
            "--uuid-timeout",
            "2s",
            "bonded",
        ])
        .expect("timeout flags should parse");
        let defaults = SessionConfig::default();

        let config = args
            .session_config()
            .expect("configuration should load");

        assert_eq!(Some(Duration::from_millis(750)), config.connect_timeout());
        assert_eq!(Duration::from_secs(2), config.uuid_timeout());
        assert_eq!(defaults.accept_timeout(), config.accept_timeout());
    }
}
