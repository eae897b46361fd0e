use tabled::Table;
use tabled::builder::Builder;
use tabled::settings::Style;

use super::painter::Painter;

/// Rounded table with a header row followed by `rows`.
pub(crate) fn grid<H, R>(headers: H, rows: R) -> Table
where
    H: IntoIterator,
    H::Item: Into<String>,
    R: IntoIterator<Item = Vec<String>>,
{
    let mut builder = Builder::default();
    builder.push_record(headers.into_iter().map(Into::into).collect::<Vec<String>>());
    rows.into_iter().for_each(|row| builder.push_record(row));

    let mut table = builder.build();
    table.with(Style::rounded());
    table
}

/// Two columns: muted field names and their values.
pub(crate) fn key_value<'a>(
    painter: &Painter,
    fields: impl IntoIterator<Item = (&'a str, String)>,
) -> Table {
    let rows = fields
        .into_iter()
        .map(|(field, value)| vec![painter.muted(field), value]);
    grid(["field", "value"], rows)
}
