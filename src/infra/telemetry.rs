use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for the fragment cache counters with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "fragcache_hit_total",
            Unit::Count,
            "Total number of widget outputs served from cache."
        );
        describe_counter!(
            "fragcache_miss_total",
            Unit::Count,
            "Total number of widget outputs computed on a cache miss."
        );
        describe_counter!(
            "fragcache_bypass_total",
            Unit::Count,
            "Total number of widget outputs computed with caching bypassed."
        );
        describe_counter!(
            "fragcache_tag_rotation_total",
            Unit::Count,
            "Total number of tag token rotations."
        );
        describe_counter!(
            "fragcache_tag_flush_total",
            Unit::Count,
            "Total number of tag flushes on drivers with tag support."
        );
    });
}
