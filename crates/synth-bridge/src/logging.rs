//! Tracing subscriber setup for hosts that don't install their own.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Map a `SYNTH_BRIDGE_LOG` value to a level name. Unknown values mean info.
fn base_level(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

fn filter_directives(level: &str) -> String {
    format!("synth_bridge={level}")
}

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `SYNTH_BRIDGE_LOG` picks the level
/// for this crate. `LOG_FORMAT=json` switches to JSON lines. Calling this
/// twice, or after another subscriber is installed, is a no-op.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = base_level(std::env::var("SYNTH_BRIDGE_LOG").ok().as_deref());
        EnvFilter::new(filter_directives(level))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping() {
        assert_eq!(base_level(None), "info");
        assert_eq!(base_level(Some("debug")), "debug");
        assert_eq!(base_level(Some("warning")), "warn");
        assert_eq!(base_level(Some("error")), "error");
        assert_eq!(base_level(Some("loud")), "info");
    }

    #[test]
    fn directives_parse() {
        let directives = filter_directives("debug");
        assert_eq!(directives, "synth_bridge=debug");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }
}
