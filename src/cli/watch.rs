use std::io;
use std::pin::Pin;

use anyhow::Result;
use clap::Args;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tracing::{debug, instrument};

use crate::cli::interrupted;
use crate::cli::output::Reporter;
use crate::cli::ui::{EventLine, WatchEvent};
use crate::session::BluetoothSession;

type EventSource = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Arguments for the `watch` command.
#[derive(Debug, Clone, Default, Args)]
pub struct WatchArgs {
    /// Stop after this many events.
    #[arg(long)]
    max_events: Option<usize>,
    /// Start a discovery scan once watching.
    #[arg(long)]
    scan: bool,
}

impl WatchArgs {
    #[must_use]
    pub fn new(max_events: Option<usize>, scan: bool) -> Self {
        Self { max_events, scan }
    }
}

#[instrument(skip_all, level = "debug", fields(max_events = ?args.max_events))]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    args: &WatchArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let mut events = subscribe(session)?;
    if args.scan {
        session.discovery().start_discovery().await?;
    }

    let interrupted = interrupted();
    tokio::pin!(interrupted);
    let mut printed = 0;
    while args.max_events.is_none_or(|limit| printed < limit) {
        let next = tokio::select! {
            biased;
            () = &mut interrupted => break,
            next = events.next() => next,
        };
        let Some((source, event)) = next else {
            debug!("all event sources ended");
            break;
        };
        debug!(source, "event received");
        let line = EventLine::new(&event, reporter.painter()).to_string();
        reporter.emit(&event, line)?;
        printed += 1;
    }
    Ok(())
}

fn subscribe(session: &BluetoothSession) -> Result<StreamMap<&'static str, EventSource>> {
    let adapter = session.adapter();
    let discovery = session.discovery();
    let bonds = session.bonds();
    let profiles = session.profiles();

    let mut sources: StreamMap<&'static str, EventSource> = StreamMap::new();
    sources.insert(
        "adapter",
        Box::pin(adapter.observe_state()?.map(|state| WatchEvent::Adapter { state })),
    );
    sources.insert(
        "scan_mode",
        Box::pin(adapter.observe_scan_mode()?.map(|mode| WatchEvent::ScanMode { mode })),
    );
    sources.insert(
        "discovery",
        Box::pin(discovery.observe_discovery()?.map(|phase| WatchEvent::Discovery { phase })),
    );
    sources.insert(
        "devices",
        Box::pin(discovery.observe_devices()?.map(|device| WatchEvent::DeviceFound { device })),
    );
    sources.insert(
        "bond",
        Box::pin(bonds.observe_bond_state()?.map(WatchEvent::Bond)),
    );
    sources.insert(
        "acl",
        Box::pin(
            profiles
                .observe_acl()?
                .map(|event| WatchEvent::Acl {
                    device: event.device,
                    action: event.action,
                }),
        ),
    );
    sources.insert(
        "connection",
        Box::pin(profiles.observe_connection_state()?.map(WatchEvent::Connection)),
    );
    Ok(sources)
}
