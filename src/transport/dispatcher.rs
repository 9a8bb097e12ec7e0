use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::available_parallelism;

use compio::dispatcher::{Dispatcher, DispatcherBuilder};
use compio::runtime::spawn;
use futures::StreamExt;
use futures_channel::mpsc::{self, UnboundedSender};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::filesystem::TreeEngine;
use crate::transport::{Request, RequestScript, Response, handle};

type Outcome = (usize, Result<Response, DispatchError>);

/// Fans requests out over worker threads that share one engine.
pub struct RequestDispatcher {
    dispatcher: Dispatcher,
    engine: Arc<TreeEngine>,
}

impl RequestDispatcher {
    /// Creates a dispatcher with `workers` threads, or one per available core.
    pub fn new(
        engine: Arc<TreeEngine>,
        workers: Option<NonZeroUsize>,
    ) -> Result<Self, DispatcherCreationError> {
        let workers_num = workers.unwrap_or_else(Self::determine_worker_count);
        debug!("Using {} worker threads for request dispatch", workers_num);

        let dispatcher = DispatcherBuilder::new()
            .worker_threads(workers_num)
            .build()
            .context(DispatcherSnafu)?;

        Ok(Self { dispatcher, engine })
    }

    fn determine_worker_count() -> NonZeroUsize {
        available_parallelism().unwrap_or(NonZeroUsize::MIN)
    }

    pub fn engine(&self) -> &Arc<TreeEngine> {
        &self.engine
    }

    /// Runs every batch of the script in order and returns the responses
    /// grouped the same way.
    pub async fn run_script(&self, script: &RequestScript) -> Result<Vec<Vec<Response>>, DispatchError> {
        let mut responses = Vec::with_capacity(script.batches.len());
        for (number, batch) in script.batches.iter().enumerate() {
            debug!("Running batch {} with {} requests", number, batch.len());
            responses.push(self.run_batch(batch).await?);
        }
        info!(
            "Completed {} requests in {} batches",
            script.request_count(),
            script.batches.len()
        );
        Ok(responses)
    }

    /// Runs the requests of one batch concurrently. Responses come back in
    /// request order.
    pub async fn run_batch(&self, batch: &[Request]) -> Result<Vec<Response>, DispatchError> {
        let (sender, mut receiver) = mpsc::unbounded::<Outcome>();
        for (index, request) in batch.iter().enumerate() {
            self.dispatch_request(sender.clone(), index, request.clone())?;
        }
        // Only the forwarders hold senders now, so the stream ends with them.
        drop(sender);

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some((index, result)) = receiver.next().await {
            debug!("Acknowledged response for request {}", index);
            outcomes.push((index, result?));
        }

        if outcomes.len() != batch.len() {
            return Err(DispatchError::BatchEndedPrematurely {
                received: outcomes.len(),
                expected: batch.len(),
            });
        }
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes.into_iter().map(|(_, response)| response).collect())
    }

    /// Dispatch a request to a worker and forward its response to `sender`.
    fn dispatch_request(
        &self,
        sender: UnboundedSender<Outcome>,
        index: usize,
        request: Request,
    ) -> Result<(), DispatchError> {
        let label = request.to_string();
        let engine = Arc::clone(&self.engine);

        let receiver = self
            .dispatcher
            .dispatch(move || async move { handle(&engine, &request) })
            .map_err(|e| DispatchError::RequestDispatchError {
                request: label.clone(),
                error: e.to_string(),
            })?;
        debug!("Dispatched request '{}'", label);

        spawn(async move {
            let result = receiver.await.context(CanceledSnafu {
                request: label.clone(),
            });
            if let Err(send_err) = sender.unbounded_send((index, result)) {
                debug!("Failed to forward response for '{}': {}", label, send_err);
            }
        })
        .detach();

        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum DispatcherCreationError {
    #[snafu(display("Failed to create request dispatcher"))]
    DispatcherError { source: std::io::Error },
}

#[derive(Debug, Snafu)]
pub enum DispatchError {
    #[snafu(display("Failed to dispatch request '{}': {}", request, error))]
    RequestDispatchError { request: String, error: String },
    #[snafu(display("Request '{}' got cancelled", request))]
    CanceledError {
        request: String,
        source: futures_channel::oneshot::Canceled,
    },
    #[snafu(display("Batch ended after {} of {} responses", received, expected))]
    BatchEndedPrematurely { received: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::NodeSpec;
    use crate::transport::Status;

    fn dispatcher(workers: usize) -> RequestDispatcher {
        RequestDispatcher::new(
            Arc::new(TreeEngine::default()),
            NonZeroUsize::new(workers),
        )
        .expect("dispatcher should start")
    }

    #[compio::test]
    async fn responses_keep_request_order() {
        let dispatcher = dispatcher(4);
        let batch = (0..16)
            .map(|index| Request::Mkdir {
                path: format!("/dir{index:02}"),
            })
            .collect::<Vec<_>>();

        let responses = dispatcher.run_batch(&batch).await.expect("batch runs");
        assert_eq!(responses.len(), 16);
        assert!(responses.iter().all(|response| response.status == Status::Created));
        assert_eq!(dispatcher.engine().list("/").expect("list").len(), 16);
    }

    #[compio::test]
    async fn concurrent_duplicates_create_exactly_once() {
        let dispatcher = dispatcher(4);
        let batch = vec![
            Request::Mkdir {
                path: "/same".into()
            };
            8
        ];

        let responses = dispatcher.run_batch(&batch).await.expect("batch runs");
        let created = responses
            .iter()
            .filter(|response| response.status == Status::Created)
            .count();
        let duplicates = responses
            .iter()
            .filter(|response| response.status == Status::AlreadyExists)
            .count();
        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);
        assert!(dispatcher.engine().verify().is_ok());
    }

    #[compio::test]
    async fn batches_run_in_sequence() {
        let dispatcher = dispatcher(2);
        let script = RequestScript {
            batches: vec![
                vec![Request::Mkdir {
                    path: "/docs".into(),
                }],
                vec![
                    Request::Create {
                        path: "/docs/a".into(),
                        spec: NodeSpec::File(b"a".to_vec()),
                    },
                    Request::Create {
                        path: "/docs/b".into(),
                        spec: NodeSpec::File(b"b".to_vec()),
                    },
                ],
                vec![Request::List {
                    path: "/docs".into(),
                }],
            ],
            ..RequestScript::default()
        };

        let responses = dispatcher.run_script(&script).await.expect("script runs");
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[1][0].status, Status::Created);
        assert_eq!(responses[1][1].status, Status::Created);
        assert_eq!(responses[2][0].status, Status::Ok);
    }

    #[compio::test]
    async fn empty_batch_yields_no_responses() {
        let dispatcher = dispatcher(1);
        let responses = dispatcher.run_batch(&[]).await.expect("empty batch");
        assert!(responses.is_empty());
    }
}
