use std::fmt::Write as _;
use std::io;

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use crate::cli::output::Reporter;
use crate::radio::{Address, Device};
use crate::session::BluetoothSession;
use crate::utils::display_name;

/// Arguments for the `uuids` command.
#[derive(Debug, Clone, Args)]
pub struct UuidsArgs {
    /// Device address, e.g. `AA:BB:CC:DD:EE:01`.
    address: Address,
}

impl UuidsArgs {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[instrument(skip_all, level = "debug", fields(address = %args.address))]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    args: &UuidsArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let device = Device::new(args.address);
    let uuids = reporter
        .spinner()
        .while_waiting(
            "Querying services",
            session.uuids().resolve_uuids(&device),
        )
        .await?;

    let painter = reporter.painter();
    let mut pretty = format!(
        "{} {} {}",
        painter.heading("Services of"),
        painter.address(uuids.device().address().to_string()),
        painter.muted(format!("({})", display_name(uuids.device()))),
    );
    for uuid in uuids.uuids() {
        write!(pretty, "\n  {uuid}")?;
    }
    reporter.emit(&uuids, pretty)
}
