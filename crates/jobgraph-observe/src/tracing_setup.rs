//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! Workers run each job inside a `job` span carrying `workflow_id` and
//! `job_id`, so every log line of a job is attributable to it.
//!
//! # Usage
//!
//! ```no_run
//! use jobgraph_observe::{LogFormat, TracingOptions, init_tracing};
//!
//! // Human-readable logs
//! init_tracing(&TracingOptions::default()).unwrap();
//!
//! // JSON lines plus OpenTelemetry spans on stdout
//! init_tracing(&TracingOptions { format: LogFormat::Json, enable_otel: true, ..Default::default() }).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Instrumentation name reported to OpenTelemetry.
pub const TRACER_NAME: &str = "jobgraph";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub format: LogFormat,
    pub enable_otel: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            enable_otel: false,
            default_filter: "info".to_string(),
        }
    }
}

/// `RUST_LOG` if set and valid, otherwise `default_filter`.
pub fn build_env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// - Always installs a `fmt` layer with target visibility and span close
///   timing, in the requested [`LogFormat`].
/// - When `enable_otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = build_env_filter(&options.default_filter);
    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer(options.format))
        .with(env_filter);

    if options.enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(TRACER_NAME);
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        subscriber.with(otel_layer).try_init()?;

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
    } else {
        subscriber.try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = TracingOptions::default();
        assert_eq!(options.format, LogFormat::Pretty);
        assert!(!options.enable_otel);
        assert_eq!(options.default_filter, "info");
    }

    #[test]
    fn test_build_env_filter_accepts_directives() {
        let filter = build_env_filter("jobgraph_core=debug,warn");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_init_twice_is_an_error() {
        let options = TracingOptions {
            format: LogFormat::Json,
            ..Default::default()
        };
        init_tracing(&options).unwrap();
        tracing::info!(workflow_id = "wf-1", "subscriber installed");
        assert!(init_tracing(&options).is_err());
        shutdown_tracing();
    }
}
