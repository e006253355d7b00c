use std::str::FromStr;

use tracing::subscriber;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::FmtSubscriber;

/// Output format for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    HumanReadable,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "json" => LogFormat::Json,
            "human" | "human_readable" => LogFormat::HumanReadable,
            "compact" => LogFormat::Compact,
            other => return Err(format!("Unknown log format: {other}")),
        })
    }
}

/// Configure the global logger.
///
/// `default_level` is used when RUST_LOG is not set. Calling this more than
/// once is a no-op for the later calls.
pub fn configure_global_logger(default_level: tracing::Level, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_thread_ids(true)
        .with_thread_names(true);

    let result = match format {
        LogFormat::Json => subscriber::set_global_default(
            builder
                .json()
                .with_file(true)
                .with_line_number(true)
                .finish(),
        ),
        LogFormat::HumanReadable => subscriber::set_global_default(
            builder.with_file(true).with_line_number(true).finish(),
        ),
        LogFormat::Compact => subscriber::set_global_default(builder.compact().finish()),
    };

    if result.is_err() {
        // Someone else (usually a test harness) got there first.
        tracing::debug!("global logger already configured");
    }
}

/// Configure a logger that writes through the test writer so output is
/// captured per test.
pub fn configure_test_logger() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .finish();
    let _ = subscriber::set_global_default(subscriber);
}
