use std::io;

use anyhow::Result;
use btsession_macros::progress;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::instrument;
use uuid::Uuid;

use crate::cli::output::Reporter;
use crate::cli::transcript;
use crate::radio::Socket;
use crate::session::BluetoothSession;

/// Arguments for the `serve` command.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Service name published for the listener.
    #[arg(long, default_value = "btsession")]
    name: String,
    /// Service UUID to listen on. Defaults to the configured service id (SPP).
    #[arg(long)]
    uuid: Option<Uuid>,
    /// Accept peers without authentication or encryption.
    #[arg(long)]
    insecure: bool,
    /// Line to send once a peer connects. Repeatable.
    #[arg(long = "send", value_name = "TEXT")]
    messages: Vec<String>,
    /// Stop after this many received lines.
    #[arg(long)]
    max_lines: Option<usize>,
}

#[instrument(skip_all, level = "debug", fields(name = %args.name))]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    args: &ServeArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let service_id = args
        .uuid
        .unwrap_or_else(|| session.config().default_service_id());
    let socket = accept(session, &args.name, service_id, !args.insecure).await?;
    let remote = socket.remote_device().clone();
    let connection = session.open_connection(socket)?;

    transcript::connected(reporter, &remote, service_id)?;
    transcript::send_all(reporter, &connection, &args.messages).await?;
    transcript::relay_lines(reporter, &connection, args.max_lines).await?;
    Ok(())
}

#[progress(
    message = format!("Waiting for a peer on {name}"),
    finished = format!("{} Peer connected", "✓".green()),
)]
#[instrument(skip(session), level = "info")]
async fn accept(
    session: &BluetoothSession,
    name: &str,
    service_id: Uuid,
    secure: bool,
) -> Result<Socket> {
    let negotiation = session
        .negotiator()
        .connect_as_server(name, service_id, secure)?;
    Ok(negotiation.await?)
}
