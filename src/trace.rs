use tracing::dispatcher::{Dispatch, set_global_default};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub use tracing_futures::Instrument;

/// Environment variable holding the log filter used by [`init_from_env`].
pub const LOG_ENV: &str = "LOKI_STORAGE_LOG";

const DEFAULT_LEVELS: &str = "loki_storage=info,kube=warn,aws=warn,azure=warn";

/// Installs the global subscriber.
///
/// `levels` uses the `EnvFilter` directive syntax, e.g. `loki_storage=debug,hyper=info`.
/// Calling this more than once is harmless; only the first subscriber is kept.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|error| {
        eprintln!("Invalid log filter {levels:?}: {error}. Falling back to {DEFAULT_LEVELS:?}.");
        EnvFilter::new(DEFAULT_LEVELS)
    });

    let dispatch = if json {
        let formatter = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .finish();
        Dispatch::new(formatter)
    } else {
        let formatter = FmtSubscriber::builder()
            .with_ansi(color)
            .with_env_filter(filter)
            .finish();
        Dispatch::new(formatter)
    };

    // Ignore errors when setting, since tests can initialize this multiple times.
    let _ = set_global_default(dispatch);
}

/// Installs the global subscriber with levels taken from `LOKI_STORAGE_LOG`.
pub fn init_from_env() {
    let levels = std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_LEVELS.to_owned());
    let json = std::env::var("LOKI_STORAGE_LOG_FORMAT").is_ok_and(|format| format == "json");
    init(std::io::IsTerminal::is_terminal(&std::io::stdout()), json, &levels);
}

pub fn current_span() -> tracing::Span {
    tracing::Span::current()
}
