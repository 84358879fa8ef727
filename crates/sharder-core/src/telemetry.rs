//! Tracing setup
//!
//! Console logging shared by both binaries:
//! - `RUST_LOG` filtering, INFO by default
//! - `LOG_FORMAT=json` for JSON lines, plain text otherwise

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` from the environment.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) => Self::parse(&v),
            Err(_) => Self::Text,
        }
    }

    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init(),
    }
}
