use std::io::{self, IsTerminal};
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::ProgressStyle;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Metadata};
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::filter::{EnvFilter, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

use crate::error::TelemetryError;

const DEFAULT_DIRECTIVE: &str = "warn";
const SPINNER_TICK: Duration = Duration::from_millis(90);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Where log records go.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum LogSink {
    /// Human-readable events on stderr, with spinners for progress spans.
    Terminal,
    /// One JSON object per event on stderr; stdout stays reserved for results.
    Structured,
}

impl LogSink {
    fn detect(interactive_terminal: bool) -> Self {
        if interactive_terminal && io::stderr().is_terminal() {
            Self::Terminal
        } else {
            Self::Structured
        }
    }

    fn layers(self, filter: EnvFilter) -> Vec<BoxedLayer> {
        match self {
            Self::Terminal => {
                let progress = IndicatifLayer::new()
                    .with_progress_style(spinner_style())
                    .with_tick_settings(TickSettings {
                        default_tick_interval: Some(SPINNER_TICK),
                        ..TickSettings::default()
                    });
                let events = fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(progress.get_stderr_writer())
                    .with_filter(filter)
                    .boxed();
                vec![events, progress.with_filter(filter_fn(is_progress_span)).boxed()]
            }
            Self::Structured => vec![
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .with_filter(filter)
                    .boxed(),
            ],
        }
    }
}

/// Installs the process-wide subscriber on first call. Later calls return the
/// first outcome and ignore their arguments.
pub(crate) fn initialise_tracing(
    service_name: &str,
    interactive_terminal: bool,
    log_level: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| {
            let sink = LogSink::detect(interactive_terminal);
            install(service_name, sink, log_filter(log_level))
        })
        .as_ref()
        .copied()
}

fn install(service_name: &str, sink: LogSink, filter: EnvFilter) -> Result<(), TelemetryError> {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(service_name.to_owned());
    global::set_tracer_provider(provider);

    tracing_subscriber::registry()
        .with(sink.layers(filter))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;
    Ok(())
}

fn log_filter(log_level: Option<LevelFilter>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::builder()
            .with_default_directive(level.into())
            .parse_lossy(""),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue.bold} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

/// Spans from this crate at `info` or above get a spinner.
fn is_progress_span(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
        && *metadata.level() <= Level::INFO
}
