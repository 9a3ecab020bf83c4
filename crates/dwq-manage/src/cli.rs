use clap::{Parser, Subcommand};
use dwq_util::config::{BrokerAddr, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "dwqm", about = "dwq: disque-based work queue (management tool)")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long = "broker", env = "DWQ_BROKER", default_value_t = BrokerAddr::default(), global = true)]
    pub broker: BrokerAddr,

    #[arg(short = 'v', long = "verbose", value_enum, default_value_t = LogLevel::Info, global = true)]
    pub verbosity: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or drain broker queues.
    Queue {
        /// Show queue(s); all queues if no names given.
        #[arg(short = 's', long = "show", num_args = 0..)]
        show: Option<Vec<String>>,

        /// Drain queue(s) by fast-ACKing every job until empty.
        #[arg(short = 'd', long = "drain", num_args = 0..)]
        drain: Option<Vec<String>>,
    },
    /// Control worker nodes via their control queues.
    Control {
        /// List known worker nodes (best-effort).
        #[arg(short = 'l', long = "list", num_args = 0..)]
        list: Option<Vec<String>>,

        /// Pause job fetching on the named worker(s).
        #[arg(short = 'p', long = "pause", num_args = 0..)]
        pause: Option<Vec<String>>,

        /// Resume job fetching on the named worker(s).
        #[arg(short = 'r', long = "resume", num_args = 0..)]
        resume: Option<Vec<String>>,

        /// Shut down the named worker(s) (equivalent to SIGTERM).
        #[arg(short = 's', long = "shutdown", num_args = 0..)]
        shutdown: Option<Vec<String>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn show_with_no_names_is_some_empty_not_none() {
        let cli = Cli::parse_from(["dwqm", "queue", "--show"]);
        match cli.command {
            Command::Queue { show, drain } => {
                assert_eq!(show, Some(vec![]));
                assert_eq!(drain, None);
            }
            _ => panic!("expected Queue"),
        }
    }

    #[test]
    fn show_with_names_collects_them() {
        let cli = Cli::parse_from(["dwqm", "queue", "--show", "ci", "nightly"]);
        match cli.command {
            Command::Queue { show, .. } => assert_eq!(show, Some(vec!["ci".to_owned(), "nightly".to_owned()])),
            _ => panic!("expected Queue"),
        }
    }

    #[test]
    fn control_pause_with_node_names() {
        let cli = Cli::parse_from(["dwqm", "control", "--pause", "worker-1"]);
        match cli.command {
            Command::Control { pause, list, resume, shutdown } => {
                assert_eq!(pause, Some(vec!["worker-1".to_owned()]));
                assert_eq!(list, None);
                assert_eq!(resume, None);
                assert_eq!(shutdown, None);
            }
            _ => panic!("expected Control"),
        }
    }
}
