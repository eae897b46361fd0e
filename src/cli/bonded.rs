use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::output::Reporter;
use crate::cli::ui::DeviceTable;
use crate::session::BluetoothSession;

#[instrument(skip_all, level = "debug")]
pub(crate) async fn run<W: io::Write>(
    session: &BluetoothSession,
    reporter: &mut Reporter<'_, W>,
) -> Result<()> {
    let devices = session.bonded_devices().await?;
    if devices.is_empty() {
        let note = reporter.painter().muted("No bonded devices.");
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
