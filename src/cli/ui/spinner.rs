use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const TICK: Duration = Duration::from_millis(120);
const TEMPLATE: &str = "{spinner:.cyan} {wide_msg} [{elapsed}]";

/// Draws on stderr while a command waits on the radio. Does nothing unless
/// stderr is an interactive terminal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Spinner {
    enabled: bool,
}

impl Spinner {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) async fn while_waiting<T>(&self, message: &str, operation: impl Future<Output = T>) -> T {
        let bar = self.enabled.then(|| start(message));
        let output = operation.await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        output
    }
}

fn start(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner()
        .with_style(style)
        .with_message(message.to_owned());
    bar.enable_steady_tick(TICK);
    bar
}
