use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::filesystem::EngineConfig;
use crate::transport::Request;

/// Engine settings a script may carry. Unset values keep whatever the caller
/// configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOverrides {
    pub cache_capacity: Option<NonZeroUsize>,
    pub lock_timeout: Option<Duration>,
}

impl EngineOverrides {
    pub fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(capacity) = self.cache_capacity {
            config = config.with_cache_capacity(capacity);
        }
        if let Some(timeout) = self.lock_timeout {
            config = config.with_lock_timeout(timeout);
        }
        config
    }
}

/// Requests grouped into batches. Requests in one batch may run concurrently,
/// batches run one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestScript {
    pub engine: EngineOverrides,
    pub batches: Vec<Vec<Request>>,
}

fn key<'a>(name: &'static str) -> Yaml<'a> {
    Yaml::Value(Scalar::String(Cow::Borrowed(name)))
}

impl RequestScript {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        debug!("Reading request script: {}", path.best_effort_path_display());
        let bytes = compio::fs::read(path).await.context(ReadSnafu {
            file_path: path.to_path_buf(),
        })?;
        debug!("Successfully read request script: {} bytes", bytes.len());

        let contents = String::from_utf8(bytes).context(EncodingSnafu {
            file_path: path.to_path_buf(),
        })?;
        contents.as_str().try_into()
    }

    pub fn request_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    fn parse_engine(top_level: &LinkedHashMap<Yaml, Yaml>) -> Result<EngineOverrides, ScriptError> {
        let Some(engine) = top_level.get(&key("engine")) else {
            return Ok(EngineOverrides::default());
        };
        let engine = engine.as_mapping().ok_or(ScriptError::EngineNotMap)?;

        let positive = |name: &'static str| -> Result<Option<u64>, ScriptError> {
            match engine.get(&key(name)) {
                None => Ok(None),
                Some(Yaml::Value(Scalar::Integer(value))) if *value > 0 => Ok(Some(*value as u64)),
                Some(_) => Err(ScriptError::InvalidEngineSetting { setting: name }),
            }
        };

        Ok(EngineOverrides {
            cache_capacity: positive("cache_capacity")?
                .and_then(|value| NonZeroUsize::new(value as usize)),
            lock_timeout: positive("lock_timeout_ms")?.map(Duration::from_millis),
        })
    }

    fn parse_batch(entries: &[Yaml]) -> Vec<Request> {
        entries
            .iter()
            .filter_map(|entry| {
                let parsed = entry.as_mapping().and_then(Request::from_yaml);
                if entry.as_mapping().is_none() {
                    warn!("Skipping request entry that is not a map: {:?}", entry);
                }
                parsed
            })
            .collect()
    }

    fn parse_batches(top_level: &LinkedHashMap<Yaml, Yaml>) -> Result<Vec<Vec<Request>>, ScriptError> {
        let mut batches = Vec::new();

        if let Some(section) = top_level.get(&key("batches")) {
            let section = section
                .as_sequence()
                .ok_or(ScriptError::BatchesNotSequence)?;
            for batch in section {
                match batch.as_sequence() {
                    Some(entries) => batches.push(Self::parse_batch(entries)),
                    None => warn!("Skipping batch that is not a sequence: {:?}", batch),
                }
            }
        }

        if let Some(section) = top_level.get(&key("requests")) {
            let section = section
                .as_sequence()
                .ok_or(ScriptError::RequestsNotSequence)?;
            batches.extend(
                Self::parse_batch(section)
                    .into_iter()
                    .map(|request| vec![request]),
            );
        }

        batches.retain(|batch| !batch.is_empty());
        Ok(batches)
    }
}

impl TryFrom<&str> for RequestScript {
    type Error = ScriptError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let documents = Yaml::load_from_str(contents).context(ParseSnafu)?;
        let document = documents.first().ok_or(ScriptError::MalformedScript)?;
        let top_level = document.as_mapping().ok_or(ScriptError::TopLevelNotMap)?;

        let script = RequestScript {
            engine: Self::parse_engine(top_level)?,
            batches: Self::parse_batches(top_level)?,
        };
        debug!(
            "Parsed {} requests in {} batches",
            script.request_count(),
            script.batches.len()
        );
        Ok(script)
    }
}

#[derive(Debug, Snafu)]
pub enum ScriptError {
    #[snafu(display("Failed to read the request script: {}", file_path.best_effort_path_display()))]
    ReadError {
        file_path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Request script is not valid UTF-8: {}", file_path.best_effort_path_display()))]
    EncodingError {
        file_path: PathBuf,
        source: std::string::FromUtf8Error,
    },
    #[snafu(display("Failed to parse the request script"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Improperly formatted request script"))]
    MalformedScript,
    #[snafu(display("Top level of the request script should be a map"))]
    TopLevelNotMap,
    #[snafu(display("Engine section should be a map"))]
    EngineNotMap,
    #[snafu(display("Engine setting '{}' should be a positive integer", setting))]
    InvalidEngineSetting { setting: &'static str },
    #[snafu(display("Batches section should be a sequence of sequences"))]
    BatchesNotSequence,
    #[snafu(display("Requests section should be a sequence"))]
    RequestsNotSequence,
}
