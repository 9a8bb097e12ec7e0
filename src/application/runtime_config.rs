use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::filesystem::EngineConfig;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub script: PathBuf,
    pub engine: EngineConfig,
    pub workers: Option<NonZeroUsize>,
}

impl From<Cli> for RuntimeConfig {
    fn from(cli: Cli) -> Self {
        Self {
            script: cli.script,
            engine: EngineConfig::default()
                .with_cache_capacity(cli.cache_capacity)
                .with_lock_timeout(Duration::from_millis(cli.lock_timeout_ms)),
            workers: cli.workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_values_flow_into_engine_config() {
        let cli = Cli::try_parse_from([
            "canopy",
            "run.yaml",
            "--cache-capacity",
            "16",
            "--lock-timeout-ms",
            "75",
        ])
        .expect("args parse");
        let config = RuntimeConfig::from(cli);

        assert_eq!(config.script, PathBuf::from("run.yaml"));
        assert_eq!(config.engine.cache_capacity.get(), 16);
        assert_eq!(config.engine.lock_timeout, Duration::from_millis(75));
        assert!(config.workers.is_none());
    }
}
