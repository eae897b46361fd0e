use std::io;

use anyhow::{Result, bail};
use btsession_macros::progress;
use clap::Args;
use owo_colors::OwoColorize;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use uuid::Uuid;

use crate::cli::output::Reporter;
use crate::cli::transcript;
use crate::radio::{Address, BondState, Device, Socket};
use crate::session::BluetoothSession;

/// Arguments for the `connect` command.
#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    /// Device address, e.g. `AA:BB:CC:DD:EE:01`.
    address: Address,
    /// Service UUID to dial. Defaults to the configured service id (SPP).
    #[arg(long)]
    uuid: Option<Uuid>,
    /// Dial without authentication or encryption.
    #[arg(long)]
    insecure: bool,
    /// Bond with the device before dialling.
    #[arg(long)]
    pair: bool,
    /// Line to send once connected. Repeatable.
    #[arg(long = "send", value_name = "TEXT")]
    messages: Vec<String>,
    /// Stop after this many received lines.
    #[arg(long)]
    max_lines: Option<usize>,
}

#[instrument(skip_all, level = "debug", fields(address = %args.address))]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    args: &ConnectArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let device = Device::new(args.address);
    if args.pair {
        pair(session, &device).await?;
    }

    let service_id = args
        .uuid
        .unwrap_or_else(|| session.config().default_service_id());
    let socket = dial(session, &device, service_id, !args.insecure).await?;
    let remote = socket.remote_device().clone();
    let connection = session.open_connection(socket)?;

    transcript::connected(reporter, &remote, service_id)?;
    transcript::send_all(reporter, &connection, &args.messages).await?;
    transcript::relay_lines(reporter, &connection, args.max_lines).await?;
    Ok(())
}

#[progress(
    message = "Connecting",
    finished = format!("{} Connected", "✓".green()),
)]
#[instrument(skip(session, device), level = "info", fields(address = %device.address()))]
async fn dial(
    session: &BluetoothSession,
    device: &Device,
    service_id: Uuid,
    secure: bool,
) -> Result<Socket> {
    let negotiation = session
        .negotiator()
        .connect_as_client(device, service_id, secure)?;
    match negotiation.await {
        Ok(socket) => Ok(socket),
        Err(error) => {
            let finish_message = format!("{} Connection failed", "✗".red());
            tracing::Span::current().pb_set_finish_message(&finish_message);
            Err(error.into())
        }
    }
}

/// Bonds with `device` and waits for the outcome. Does nothing when the
/// platform does not start bonding, e.g. because the device is already bonded.
#[instrument(skip_all, level = "debug", fields(address = %device.address()))]
async fn pair(session: &BluetoothSession, device: &Device) -> Result<()> {
    let bonds = session.bonds();
    let mut events = bonds.observe_bond_state()?;
    if !bonds.create_bond(device).await? {
        debug!("bonding not started");
        return Ok(());
    }

    while let Some(event) = events.next().await {
        if event.device != *device {
            continue;
        }
        match event.state {
            BondState::Bonded => return Ok(()),
            BondState::None => bail!("bonding with {} failed", device.address()),
            BondState::Bonding => debug!("bonding in progress"),
        }
    }
    bail!("the session closed while bonding")
}
