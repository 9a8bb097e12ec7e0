use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

use crate::application::data::LogLevel;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Runs request scripts against an in-memory file tree")]
pub struct Cli {
    /// YAML request script to execute
    pub script: PathBuf,
    #[clap(long, short, default_value = "warn", value_enum)]
    pub log_level: LogLevel,

    /// Maximum number of cached path lookups
    #[clap(long, default_value = "1024")]
    pub cache_capacity: NonZeroUsize,

    /// How long an operation waits for the tree lock before reporting BUSY
    #[clap(long, default_value_t = 500)]
    pub lock_timeout_ms: u64,

    /// Worker threads used to dispatch requests, defaults to available parallelism
    #[clap(long, short)]
    pub workers: Option<NonZeroUsize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let cli = Cli::try_parse_from(["canopy", "script.yaml"]).expect("minimal args parse");
        assert_eq!(cli.script, PathBuf::from("script.yaml"));
        assert_eq!(cli.cache_capacity.get(), 1024);
        assert_eq!(cli.lock_timeout_ms, 500);
        assert!(cli.workers.is_none());
        assert!(matches!(cli.log_level, LogLevel::Warn));
    }

    #[test]
    fn parses_every_flag() {
        let cli = Cli::try_parse_from([
            "canopy",
            "run.yaml",
            "--log-level",
            "debug",
            "--cache-capacity",
            "8",
            "--lock-timeout-ms",
            "20",
            "--workers",
            "3",
        ])
        .expect("all flags parse");
        assert!(matches!(cli.log_level, LogLevel::Debug));
        assert_eq!(cli.cache_capacity.get(), 8);
        assert_eq!(cli.lock_timeout_ms, 20);
        assert_eq!(cli.workers.map(NonZeroUsize::get), Some(3));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Cli::try_parse_from(["canopy", "run.yaml", "--cache-capacity", "0"]).is_err());
    }
}
