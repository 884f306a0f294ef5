use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Maps the CLI's repeated `-v` flag to a base log level and whether the
/// `sqlx::query` target should additionally echo statements at DEBUG.
pub fn level_for_verbosity(verbosity: u8) -> (LevelFilter, bool) {
    match verbosity {
        0 => (LevelFilter::WARN, false),
        1 => (LevelFilter::INFO, false),
        2 => (LevelFilter::DEBUG, false),
        _ => (LevelFilter::DEBUG, true),
    }
}

/// Builds a [`tracing::Subscriber`] with plain formatted output, honoring
/// `RUST_LOG` if set and otherwise defaulting to the level implied by
/// `verbosity`. At the highest verbosity the `sqlx::query` target is pinned
/// to DEBUG regardless of the base level, echoing SQL statements.
pub fn get_subscriber<Sink>(verbosity: u8, sink: Sink) -> Box<dyn Subscriber + Sync + Send>
where
    Sink: for<'a> MakeWriter<'a> + Sync + Send + 'static,
{
    let (level, echo_sql) = level_for_verbosity(verbosity);

    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if echo_sql {
        filter = filter.add_directive("sqlx::query=debug".parse().expect("valid directive"));
    }

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(sink);

    Box::new(Registry::default().with(filter).with(formatting_layer))
}

/// Sets `subscriber` as the global default [`tracing::Subscriber`].
pub fn init_global_default(subscriber: impl Subscriber + Sync + Send) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_zero_is_warn_without_sql_echo() {
        let (level, echo_sql) = level_for_verbosity(0);
        assert_eq!(level, LevelFilter::WARN);
        assert!(!echo_sql);
    }

    #[test]
    fn max_verbosity_enables_sql_echo() {
        let (level, echo_sql) = level_for_verbosity(5);
        assert_eq!(level, LevelFilter::DEBUG);
        assert!(echo_sql);
    }
}
