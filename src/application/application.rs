use std::sync::Arc;

use snafu::Snafu;
use snafu::prelude::*;
use supports_color::Stream;
use tracing::{debug, info};

use crate::application::RuntimeConfig;
use crate::filesystem::{TreeEngine, TreeError};
use crate::transport::{
    DispatchError, DispatcherCreationError, RequestDispatcher, RequestScript, Response,
    ScriptError,
};

pub struct Application;

impl Application {
    /// Loads the request script, runs it against a fresh engine and prints one
    /// line per response. Returns the responses grouped by batch.
    pub async fn run(
        runtime_config: impl Into<RuntimeConfig>,
    ) -> Result<Vec<Vec<Response>>, ApplicationError> {
        let runtime_config: RuntimeConfig = runtime_config.into();
        let script = RequestScript::from_path(&runtime_config.script)
            .await
            .context(ScriptSnafu)?;
        debug!("Loaded request script: {:?}", script);

        let engine_config = script.engine.apply(runtime_config.engine);
        debug!("Engine configuration: {:?}", engine_config);
        let engine = Arc::new(TreeEngine::new(engine_config));

        let responses = RequestDispatcher::new(Arc::clone(&engine), runtime_config.workers)
            .context(DispatcherCreationSnafu)?
            .run_script(&script)
            .await
            .context(ApplicationExecutionSnafu)?;

        colored::control::set_override(supports_color::on(Stream::Stdout).is_some());
        for response in responses.iter().flatten() {
            println!("{}", response.to_colored_line());
        }

        engine.verify().context(IntegritySnafu)?;
        let stats = engine.stats().context(IntegritySnafu)?;
        info!(
            "Finished with {} nodes, cache {} hits / {} misses, {} resolver walks",
            stats.nodes, stats.cache.hits, stats.cache.misses, stats.resolver_walks
        );

        Ok(responses)
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered while loading the request script"))]
    ScriptError { source: ScriptError },
    #[snafu(display("Critical failure encountered during dispatcher creation"))]
    DispatcherCreationError { source: DispatcherCreationError },
    #[snafu(display("Critical failure encountered during request execution"))]
    ApplicationExecutionError { source: DispatchError },
    #[snafu(display("Tree failed its integrity check after execution"))]
    IntegrityError { source: TreeError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::EngineConfig;
    use crate::transport::{Body, Status};
    use std::io::Write;
    use std::num::NonZeroUsize;
    use tempfile::NamedTempFile;

    fn runtime_config(script: &NamedTempFile) -> RuntimeConfig {
        RuntimeConfig {
            script: script.path().to_path_buf(),
            engine: EngineConfig::default(),
            workers: NonZeroUsize::new(2),
        }
    }

    #[compio::test]
    async fn runs_the_docs_script_end_to_end() {
        let mut script = NamedTempFile::new().expect("Failed to create temp file");
        write!(
            script,
            "\
batches:
  - - {{ op: mkdir, path: /docs }}
  - - {{ op: create, path: /docs/readme, kind: file, content: hello }}
  - - {{ op: list, path: /docs }}
    - {{ op: update, path: /docs/readme, content: world }}
  - - {{ op: read, path: /docs/readme }}
    - {{ op: delete, path: /docs }}
  - - {{ op: delete, path: /docs, recursive: true }}
  - - {{ op: read, path: /docs/readme }}
"
        )
        .expect("Failed to write temp file");

        let responses = Application::run(runtime_config(&script))
            .await
            .expect("script runs");
        let statuses = responses
            .iter()
            .map(|batch| batch.iter().map(|response| response.status).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        assert_eq!(
            statuses,
            vec![
                vec![Status::Created],
                vec![Status::Created],
                vec![Status::Ok, Status::Ok],
                vec![Status::Ok, Status::DirectoryNotEmpty],
                vec![Status::Deleted],
                vec![Status::NotFound],
            ]
        );
        match &responses[3][0].body {
            Body::Node(info) => assert_eq!(info.payload.as_deref(), Some(&b"world"[..])),
            other => panic!("expected a node, got {other:?}"),
        }
    }

    #[compio::test]
    async fn missing_script_is_reported() {
        let config = RuntimeConfig {
            script: "definitely-missing.yaml".into(),
            engine: EngineConfig::default(),
            workers: None,
        };
        let result = Application::run(config).await;
        assert!(matches!(result, Err(ApplicationError::ScriptError { .. })));
    }
}
