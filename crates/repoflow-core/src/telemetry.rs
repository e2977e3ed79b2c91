//! Tracing setup for repoflow binaries.
//!
//! Logs go to stderr so stdout stays free for reports. `RUST_LOG` wins over
//! the level passed in. At debug and above, the `dispatch` and `job` spans
//! also log a line when they close, carrying their busy/idle time.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter directives used when `RUST_LOG` is unset. The HTTP stack stays at
/// `warn` so request chatter does not drown out job logs.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("{level},hyper=warn,hyper_util=warn,reqwest=warn")
}

fn span_events(level: Level) -> FmtSpan {
    if level >= Level::DEBUG {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_span_events(span_events(level));
    let output = if json {
        base.json().with_current_span(true).with_span_list(false).boxed()
    } else {
        base.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http_stack() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_span_close_events_only_when_verbose() {
        assert_eq!(span_events(Level::INFO), FmtSpan::NONE);
        assert_eq!(span_events(Level::DEBUG), FmtSpan::CLOSE);
        assert_eq!(span_events(Level::TRACE), FmtSpan::CLOSE);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still works");
    }
}
