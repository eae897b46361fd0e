use std::io;

use anyhow::Result;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cli::interrupted;
use crate::cli::output::Reporter;
use crate::radio::Device;
use crate::session::DuplexConnection;
use crate::utils::display_name;

/// A record of one side of a conversation over a connection.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TranscriptRecord<'a> {
    Connected { device: &'a Device, service_id: Uuid },
    Sent { line: &'a str },
    Received { line: &'a str },
    Closed { received: usize },
}

pub(crate) fn connected<W: io::Write>(
    reporter: &mut Reporter<'_, W>,
    device: &Device,
    service_id: Uuid,
) -> Result<()> {
    let painter = reporter.painter();
    let pretty = format!(
        "{} {} {}",
        painter.success("Connected to"),
        painter.address(device.address().to_string()),
        painter.muted(format!("({})", display_name(device))),
    );
    reporter.emit(&TranscriptRecord::Connected { device, service_id }, pretty)
}

/// Sends each message followed by a newline.
pub(crate) async fn send_all<W: io::Write>(
    reporter: &mut Reporter<'_, W>,
    connection: &DuplexConnection,
    messages: &[String],
) -> Result<()> {
    for message in messages {
        connection.send(&format!("{message}\n")).await?;
        let pretty = format!("{} {message}", reporter.painter().muted(">"));
        reporter.emit(&TranscriptRecord::Sent { line: message }, pretty)?;
    }
    Ok(())
}

/// Prints received lines until the peer hangs up, `max_lines` arrive, or
/// Ctrl+C is pressed. Closes the connection afterwards.
#[instrument(skip_all, level = "debug", fields(remote = %connection.remote_device().address()))]
pub(crate) async fn relay_lines<W: io::Write>(
    reporter: &mut Reporter<'_, W>,
    connection: &DuplexConnection,
    max_lines: Option<usize>,
) -> Result<usize> {
    let mut lines = connection.observe_lines();
    let interrupted = interrupted();
    tokio::pin!(interrupted);

    let mut received = 0;
    while max_lines.is_none_or(|limit| received < limit) {
        let line = tokio::select! {
            biased;
            () = &mut interrupted => {
                debug!("interrupted");
                break;
            }
            line = lines.next() => line,
        };
        let Some(line) = line else {
            debug!("peer closed the connection");
            break;
        };
        let line = line?;
        received += 1;
        let pretty = format!("{} {line}", reporter.painter().heading("<"));
        reporter.emit(&TranscriptRecord::Received { line: &line }, pretty)?;
    }

    drop(lines);
    connection.close().await;
    let note = reporter
        .painter()
        .muted(format!("Connection closed after {received} received lines."));
    reporter.emit(&TranscriptRecord::Closed { received }, note)?;
    Ok(received)
}
