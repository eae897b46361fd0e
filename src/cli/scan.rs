use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use crate::cli::command::parse_duration;
use crate::cli::output::Reporter;
use crate::cli::ui::DeviceTable;
use crate::radio::{Device, DiscoveryPhase};
use crate::session::{BluetoothSession, DiscoveryController, EventStream};

const SETTLE_TIME: Duration = Duration::from_millis(50);

/// Arguments for the `scan` command.
#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Cancel the scan after this long (e.g. `8s`, `500ms`).
    #[arg(long, default_value = "12s", value_parser = parse_duration)]
    timeout: Duration,
}

impl ScanArgs {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[instrument(skip_all, level = "debug", fields(timeout = ?args.timeout))]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    args: &ScanArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let discovery = session.discovery();
    let mut found = discovery.observe_devices()?;
    let mut phases = discovery.observe_discovery()?;

    let devices = reporter
        .spinner()
        .while_waiting(
            "Scanning for devices",
            collect_devices(&discovery, &mut found, &mut phases, args.timeout),
        )
        .await?;

    if devices.is_empty() {
        let note = reporter.painter().muted("No devices found.");
        return reporter.note(note);
    }
    if reporter.is_json() {
        for device in &devices {
            reporter.emit(device, "")?;
        }
        return Ok(());
    }
    let table = DeviceTable::new(&devices, reporter.painter()).to_string();
    reporter.note(table)
}

async fn collect_devices(
    discovery: &DiscoveryController,
    found: &mut EventStream<Device>,
    phases: &mut EventStream<DiscoveryPhase>,
    timeout: Duration,
) -> Result<Vec<Device>> {
    if !discovery.start_discovery().await? {
        debug!("joining the scan that is already running");
    }

    let mut devices = Vec::new();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            biased;
            Some(device) = found.next() => remember(&mut devices, device),
            phase = phases.next() => match phase {
                Some(DiscoveryPhase::Started) => debug!("discovery started"),
                Some(DiscoveryPhase::Finished) | None => break,
            },
            () = &mut deadline => {
                discovery.cancel_discovery().await?;
                break;
            }
        }
    }

    while let Ok(Some(device)) = tokio::time::timeout(SETTLE_TIME, found.next()).await {
        remember(&mut devices, device);
    }
    Ok(devices)
}

/// Keeps the latest report per address, in first-seen order.
fn remember(devices: &mut Vec<Device>, device: Device) {
    match devices.iter_mut().find(|known| **known == device) {
        Some(known) => *known = device,
        None => devices.push(device),
    }
}
