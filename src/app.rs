use std::io;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::cli::output::Reporter;
use crate::cli::ui::{Painter, Spinner};
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::SessionConfig;
use crate::error::CliConfigError;
use crate::radio::{RadioBackend, RadioDriver, driver_from_backend};
use crate::session::BluetoothSession;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Builds the radio driver: the fake radio when fixtures are given, the
/// system Bluetooth stack otherwise.
///
/// ```
/// # async fn demo() -> anyhow::Result<()> {
/// let fake = btsession::FakeArgs::builder()
///     .scan("AA:BB:CC:DD:EE:01|HC-05|bonded")?
///     .build();
/// let driver = btsession::radio_driver(Some(fake)).await?;
/// assert!(driver.is_available());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if the system backend is not compiled in or cannot reach
/// the Bluetooth daemon.
pub async fn radio_driver(fake_args: Option<FakeArgs>) -> Result<Arc<dyn RadioDriver>> {
    let backend = match fake_args {
        Some(fake_args) => RadioBackend::Fake(fake_args.into_radio_config()),
        None => RadioBackend::BlueZ,
    };
    if !backend.is_compiled_in() {
        return Err(CliConfigError::BackendUnavailable.into());
    }
    Ok(driver_from_backend(backend).await?)
}

/// Settings for one CLI run.
#[derive(Debug, Clone, Builder)]
pub struct RunSettings {
    output: OutputFormat,
    log_level: Option<LogLevel>,
    #[builder(default)]
    config: SessionConfig,
}

/// Runs a CLI command against `driver`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = btsession::Args::try_parse_from([
///     "btsession",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC:DD:EE:01|HC-05|bonded",
///     "bonded",
/// ])?;
/// let (command, fake_args) = args.into_command_and_fake_args();
/// let driver = btsession::radio_driver(fake_args).await?;
/// let settings = btsession::RunSettings::builder()
///     .output(btsession::OutputFormat::Json)
///     .build();
/// let mut out = Vec::new();
/// btsession::run(command, &mut out, driver, settings).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the radio operation
/// fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    driver: Arc<dyn RadioDriver>,
    settings: RunSettings,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, driver, settings).await
}

/// Runs a CLI command with an injected terminal client.
///
/// The session is shut down before returning, whether the command succeeded
/// or not.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the radio operation
/// fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, driver, settings),
    level = "info",
    fields(command = %command.name(), output = ?settings.output)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    driver: Arc<dyn RadioDriver>,
    settings: RunSettings,
) -> Result<()>
where
    W: io::Write,
{
    let RunSettings {
        output,
        log_level,
        config,
    } = settings;
    telemetry::initialise_tracing(
        "btsession",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let interactive = output == OutputFormat::Pretty && terminal_client.stdout_is_terminal();
    let spinner = Spinner::new(interactive && terminal_client.stderr_is_terminal());
    let mut reporter = Reporter::new(out, output, Painter::new(interactive), spinner);

    let session = BluetoothSession::builder()
        .driver(driver)
        .config(config)
        .build()?;
    let result = dispatch(command, &session, &mut reporter).await;
    session.shutdown().await;
    result
}

async fn dispatch<W: io::Write>(
    command: Command,
    session: &BluetoothSession,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    match command {
        Command::Adapter(args) => crate::cli::adapter::run(session, &args, reporter).await,
        Command::Bonded => crate::cli::bonded::run(session, reporter).await,
        Command::Scan(args) => crate::cli::scan::run(session, &args, reporter).await,
        Command::Uuids(args) => crate::cli::uuids::run(session, &args, reporter).await,
        Command::Connect(args) => crate::cli::connect::run(session, &args, reporter).await,
        Command::Serve(args) => crate::cli::serve::run(session, &args, reporter).await,
        Command::Watch(args) => crate::cli::watch::run(session, &args, reporter).await,
    }
}
