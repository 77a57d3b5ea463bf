//! Tracing initialisation and the per-invocation logging context.
//!
//! Call [`RunContext::new`] once at program start. It installs the global
//! subscriber (first call wins) and opens the `river.run` span every stage
//! logs under.

use tracing::{Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// Environment variable holding filter directives for river's own logging.
pub const LOG_ENV: &str = "RIVER_LOG";

const RIVER_TARGETS: [&str; 2] = ["river_core", "river_plugin"];

/// Directives used when neither `RIVER_LOG` nor `RUST_LOG` is set: the
/// chosen verbosity for river crates, warnings only for everything else.
pub fn default_directives(level: Level) -> String {
    let mut directives = String::from("warn");
    for target in RIVER_TARGETS {
        directives.push_str(&format!(",{target}={}", level.as_str().to_lowercase()));
    }
    directives
}

fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// `RIVER_LOG` takes precedence over `RUST_LOG`; with neither set,
/// [`default_directives`] applies. Logs go to stderr so stdout stays free
/// for command output.
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = build_filter(level);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Parse a verbosity name (`error`, `warn`, `info`, `debug`, `trace`), case-insensitively.
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// Logging context for one invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    span: Span,
}

impl RunContext {
    /// Install the subscriber and open the run span.
    pub fn new(level: Level, json: bool) -> Self {
        init_tracing(json, level);
        Self::detached(level, json)
    }

    /// Open the run span without touching the global subscriber.
    pub fn detached(level: Level, json: bool) -> Self {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("river.run", run_id = %run_id, verbosity = %level, json);
        Self { run_id, span }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
