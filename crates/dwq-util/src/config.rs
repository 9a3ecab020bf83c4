//! Small config value types shared by the three binaries' `clap` CLIs.

use std::fmt;
use std::str::FromStr;

/// A `host:port` pair identifying a broker node. Disque clusters may have
/// more than one node; `--broker` accepts a comma-separated list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddr(pub String);

impl BrokerAddr {
    pub const DEFAULT: &'static str = "localhost:7711";
}

impl Default for BrokerAddr {
    fn default() -> Self {
        BrokerAddr(Self::DEFAULT.to_owned())
    }
}

impl FromStr for BrokerAddr {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BrokerAddr(s.to_owned()))
    }
}

impl fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical => slog::Level::Critical,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
            LogLevel::Trace => slog::Level::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_addr_defaults_to_localhost_7711() {
        assert_eq!(BrokerAddr::default().to_string(), "localhost:7711");
    }
}
