//! Global tracing setup driven by the logger section of the config.

use tracing::Level;

use crate::config::LoggerConfig;

/// Initializes the global subscriber with the configured level, format and
/// writer. Must be called once, after the config has been validated.
pub fn setup(cfg: &LoggerConfig) {
    let level = parse_level(cfg.level.as_deref());
    let json = cfg.format.as_deref() == Some("json");
    let discard = cfg.writer.as_deref() == Some("none");

    let builder = tracing_subscriber::fmt().with_max_level(level);

    match (json, discard) {
        (true, true) => builder.json().with_writer(std::io::sink).init(),
        (true, false) => builder.json().init(),
        (false, true) => builder.with_writer(std::io::sink).init(),
        (false, false) => builder.with_ansi(!cfg.no_color).init(),
    }
}

fn parse_level(level: Option<&str>) -> Level {
    match level {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => Level::INFO,
    }
}
