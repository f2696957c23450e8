//! Log output wiring
//!
//! Two sinks share one subscriber: the service log carries scheduler, worker,
//! and observer diagnostics, while entries on the user-activity target (see
//! [`crate::userlog`]) land in their own rotating file so one user's order
//! history can be read without grepping engine noise. `RUST_LOG` overrides the
//! configured level; without it, the chattiest dependency crates are capped at
//! warn so a `debug` run stays about this crate.

use tracing::Metadata;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::config::LogSettings;
use crate::userlog::USER_ACTIVITY_TARGET;

const USER_ACTIVITY_FILE: &str = "user_activity.log";

fn rolling(settings: &LogSettings, file: &str) -> RollingFileAppender {
    match settings.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&settings.log_dir, file),
        "daily" => tracing_appender::rolling::daily(&settings.log_dir, file),
        _ => tracing_appender::rolling::never(&settings.log_dir, file),
    }
}

fn is_user_activity(meta: &Metadata<'_>) -> bool {
    meta.target() == USER_ACTIVITY_TARGET
}

/// Install the process-wide subscriber. Both returned guards must stay alive
/// for the lifetime of the process or buffered lines are lost on exit.
pub fn init_logging(settings: &LogSettings) -> Vec<WorkerGuard> {
    let (service_writer, service_guard) =
        tracing_appender::non_blocking(rolling(settings, &settings.log_file));
    let (user_writer, user_guard) =
        tracing_appender::non_blocking(rolling(settings, USER_ACTIVITY_FILE));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},sqlx=warn,redis=warn,hyper=warn",
            settings.log_level
        ))
    });

    let user_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(user_writer)
        .with_filter(filter_fn(is_user_activity));

    let registry = tracing_subscriber::registry().with(filter).with(user_layer);

    if settings.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(service_writer)
                    .with_ansi(false)
                    .with_filter(filter_fn(|meta| !is_user_activity(meta))),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(service_writer)
                    .with_ansi(false)
                    .with_filter(filter_fn(|meta| !is_user_activity(meta))),
            )
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_filter(filter_fn(|meta| !is_user_activity(meta))),
            )
            .init();
    }

    vec![service_guard, user_guard]
}
