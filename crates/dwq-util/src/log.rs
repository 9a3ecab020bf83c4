//! Logger construction. Every binary builds one root [`slog::Logger`] at
//! startup and threads it explicitly through the call stack — no process-wide
//! global logger, matching the "no hidden global" guidance this system
//! applies to the broker handle as well (see DESIGN.md).

use crate::config::LogLevel;
use slog::{o, Drain};

pub fn build_logger(level: LogLevel) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level.into()).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_logger_does_not_panic() {
        let _log = build_logger(LogLevel::Info);
    }
}
