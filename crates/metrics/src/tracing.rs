use fusion_htlc_types::SwapKey;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. `json` switches the fmt layer to
/// one JSON object per line.
pub fn init_tracing(level: &str, json: bool) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    let metrics_layer = MetricsLayer::new(MetricsCollector::new());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(metrics_layer);

    let result = if json {
        registry
            .with(fmt::layer().with_target(true).with_level(true).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };

    result.map_err(|e| TracingError::InitError(e.to_string()))
}

/// Tracing layer that counts warn and error events
pub struct MetricsLayer {
    collector: MetricsCollector,
}

impl MetricsLayer {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => self.collector.record_log_event("error"),
            Level::WARN => self.collector.record_log_event("warn"),
            _ => {}
        }
    }
}

/// Correlation ID tying together the log lines of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one swap execution
#[derive(Debug, Clone)]
pub struct SwapSpan {
    pub correlation_id: CorrelationId,
    pub key: SwapKey,
}

impl SwapSpan {
    pub fn new(key: SwapKey) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            key,
        }
    }

    /// Span to attach to the swap's future with `Instrument`
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "swap",
            correlation_id = %self.correlation_id,
            order_hash = %format_args!("{:#x}", self.key.order_hash),
            fill_index = self.key.fill_index,
        )
    }

    /// Enter the span on the current thread
    pub fn enter(&self) -> tracing::span::EnteredSpan {
        self.span().entered()
    }
}

/// Log an error with the swap it belongs to before passing it on
pub trait ErrorContext {
    fn with_swap_key(self, key: &SwapKey) -> Self;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_swap_key(self, key: &SwapKey) -> Self {
        self.map_err(|e| {
            tracing::error!(
                order_hash = %format_args!("{:#x}", key.order_hash),
                fill_index = key.fill_index,
                error = %e,
                "swap error"
            );
            e
        })
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
