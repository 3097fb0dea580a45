//! Observability infrastructure for Palisade.
//!
//! Structured logging with consistent spans. Log shipping and exporter
//! wiring are deployment concerns; this module only provides initialization
//! helpers and span constructors.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `palisade_lock=debug`)
///
/// # Example
///
/// ```rust
/// use palisade_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for lock operations with standard fields.
///
/// # Example
///
/// ```rust
/// use palisade_core::observability::lock_span;
///
/// let span = lock_span("try_acquire", "tenant-1", "default");
/// let _guard = span.enter();
/// // ... run the acquisition
/// ```
#[must_use]
pub fn lock_span(operation: &str, resource: &str, scope: &str) -> Span {
    tracing::info_span!(
        "lock",
        op = operation,
        resource = resource,
        scope = scope,
    )
}
