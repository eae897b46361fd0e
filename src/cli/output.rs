use std::fmt::Display;
use std::io;

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::cli::ui::{Painter, Spinner};

/// Writes command results in the selected format.
pub(crate) struct Reporter<'a, W> {
    out: &'a mut W,
    format: OutputFormat,
    painter: Painter,
    spinner: Spinner,
}

impl<'a, W: io::Write> Reporter<'a, W> {
    pub(crate) fn new(out: &'a mut W, format: OutputFormat, painter: Painter, spinner: Spinner) -> Self {
        Self {
            out,
            format,
            painter,
            spinner,
        }
    }

    pub(crate) fn painter(&self) -> &Painter {
        &self.painter
    }

    pub(crate) fn spinner(&self) -> &Spinner {
        &self.spinner
    }

    /// Writes `record` as one JSON line, or `pretty` as text.
    pub(crate) fn emit<T: Serialize>(&mut self, record: &T, pretty: impl Display) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut *self.out, record)?;
                writeln!(self.out)?;
            }
            OutputFormat::Pretty => writeln!(self.out, "{pretty}")?,
        }
        self.out.flush()?;
        Ok(())
    }

    /// Writes text in pretty mode only.
    pub(crate) fn note(&mut self, pretty: impl Display) -> Result<()> {
        if self.format == OutputFormat::Pretty {
            writeln!(self.out, "{pretty}")?;
        }
        Ok(())
    }

    pub(crate) fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn render(format: OutputFormat) -> String {
        let mut out = Vec::new();
        let mut reporter = Reporter::new(&mut out, format, Painter::new(false), Spinner::new(false));
        reporter
            .emit(&json!({ "state": "on" }), "adapter on")
            .expect("emit should write");
        reporter.note("done").expect("note should write");
        String::from_utf8(out).expect("output should be UTF-8")
    }

    #[test]
    fn json_output_is_one_object_per_line() {
        assert_eq!("{\"state\":\"on\"}\n", render(OutputFormat::Json));
    }

    #[test]
    fn pretty_output_includes_notes() {
        assert_eq!("adapter on\ndone\n", render(OutputFormat::Pretty));
    }
}
