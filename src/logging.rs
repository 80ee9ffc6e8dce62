use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "event_bridge=info,warn";
const VERBOSE_FILTER: &str = "event_bridge=debug,rdkafka=info,info";

/// Installs a global subscriber for hosts that do not set up their own.
///
/// `RUST_LOG` overrides the default filter unless `verbose` is set. Returns
/// `false` if a global subscriber was already installed.
pub fn init_logging(json: bool, verbose: bool) -> bool {
    let env_filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
