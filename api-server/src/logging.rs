//! Process-wide tracing subscriber
//!
//! The filter comes from `RUST_LOG` and falls back to `info`. Output goes to
//! stderr, either compact text or one JSON object per line.

use std::str::FromStr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

fn filters() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(format: LogFormat) {
    // The generics mean each branch builds its own layer type
    let result = match format {
        LogFormat::Json => {
            let l = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .with_filter(filters());
            tracing_subscriber::registry().with(l).try_init()
        }
        LogFormat::Text => {
            let l = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(filters());
            tracing_subscriber::registry().with(l).try_init()
        }
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
