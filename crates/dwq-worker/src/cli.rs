use clap::Parser;
use dwq_util::config::{BrokerAddr, LogLevel};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "dwqw", about = "dwq worker: runs jobs checked out from a git repo")]
pub struct Cli {
    /// Queues to fetch jobs from.
    #[arg(short = 'q', long = "queues", value_delimiter = ',', default_value = "default")]
    pub queues: Vec<String>,

    /// Number of worker slots. Defaults to the number of CPU cores.
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// This worker's name, used in its control queue and job results.
    /// Defaults to the hostname.
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    #[arg(short = 'b', long = "broker", env = "DWQ_BROKER", default_value_t = BrokerAddr::default())]
    pub broker: BrokerAddr,

    #[arg(short = 'v', long = "verbose", value_enum, default_value_t = LogLevel::Info)]
    pub verbosity: LogLevel,

    #[arg(short = 'Q', long = "quiet")]
    pub quiet: bool,

    /// Maximum number of shared (non-exclusive) working directories cached
    /// at once.
    #[arg(long = "jobdir-capacity", default_value_t = 8)]
    pub jobdir_capacity: usize,

    /// Root directory for cached git checkouts. Defaults to a per-worker
    /// directory under the system temp dir.
    #[arg(long = "jobdir-root")]
    pub jobdir_root: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_default_to_a_single_default_queue() {
        let cli = Cli::parse_from(["dwqw"]);
        assert_eq!(cli.queues, vec!["default".to_owned()]);
        assert_eq!(cli.jobdir_capacity, 8);
        assert!(cli.jobdir_root.is_none());
    }

    #[test]
    fn comma_separated_queues_split_into_a_vec() {
        let cli = Cli::parse_from(["dwqw", "-q", "ci,nightly"]);
        assert_eq!(cli.queues, vec!["ci".to_owned(), "nightly".to_owned()]);
    }

    #[test]
    fn explicit_jobdir_root_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["dwqw", "--jobdir-root", dir.path().to_str().unwrap()]);
        assert_eq!(cli.jobdir_root, Some(dir.path().to_owned()));
    }
}
