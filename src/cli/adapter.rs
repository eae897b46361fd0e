use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use crate::cli::output::Reporter;
use crate::cli::ui::key_value;
use crate::radio::{AdapterState, EnableOutcome};
use crate::session::BluetoothSession;

/// Arguments for the `adapter` command.
#[derive(Debug, Clone, Default, Args)]
pub struct AdapterArgs {
    /// Ask the user to turn the adapter on when it is off.
    #[arg(long)]
    enable: bool,
}

impl AdapterArgs {
    #[must_use]
    pub fn new(enable: bool) -> Self {
        Self { enable }
    }
}

#[derive(Debug, Serialize)]
struct AdapterReport {
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<AdapterState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable: Option<EnableOutcome>,
}

#[instrument(skip_all, level = "debug")]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    args: &AdapterArgs,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let adapter = session.adapter();
    let available = adapter.is_available();

    let mut report = AdapterReport {
        available,
        state: None,
        enable: None,
    };
    if available {
        if args.enable {
            report.enable = Some(adapter.request_enable().await?);
        }
        report.state = Some(adapter.state().await?);
    }

    let painter = reporter.painter();
    let mut rows = vec![("available", available.to_string())];
    if let Some(state) = report.state {
        rows.push(("state", painter.adapter_state(state)));
    }
    if let Some(outcome) = report.enable {
        rows.push(("enable", outcome.to_string()));
    }
    let table = key_value(painter, rows);
    reporter.emit(&report, table)
}
