//! Batch processing for JSON-RPC requests
//!
//! JSON-RPC 2.0 allows several requests in one body as an array. Every
//! element runs through its own state machine; a failing element never
//! affects its neighbours.
//!
//! # Batch Modes
//!
//! - **Parallel**: elements run concurrently on the calling task
//! - **Sequential**: elements run one after another, in order
//!
//! Either way, responses come back in input order and notifications are
//! left out. A batch made only of notifications produces no responses.
//!
//! # Size Limiting
//!
//! With a maximum batch size configured, an oversized batch is rejected as a
//! whole with a single invalid-request error carrying a null id.
//!
//! # Examples
//!
//! ```rust
//! use rpcflow_server::BatchMode;
//!
//! assert_eq!(BatchMode::default(), BatchMode::Parallel);
//! ```

use crate::execution::{CallEnvironment, CallOutcome, Pipeline};
use rpcflow_core::{Error, Id, JsonRpcResponse};
use serde_json::Value;

/// How the elements of a batch are executed
///
/// # Trade-offs
///
/// - **Parallel**: faster overall; calls may finish out of order, responses
///   are still returned in input order
/// - **Sequential**: later elements may rely on the effects of earlier ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Run every element concurrently
    #[default]
    Parallel,

    /// Run elements in order, one at a time
    Sequential,
}

impl BatchMode {
    fn as_str(self) -> &'static str {
        match self {
            BatchMode::Parallel => "parallel",
            BatchMode::Sequential => "sequential",
        }
    }
}

/// Result of running a batch
#[derive(Debug)]
pub(crate) enum BatchOutcome {
    /// Responses in input order; empty when every element was a notification
    Responses(Vec<JsonRpcResponse>),
    /// The whole batch was refused
    Rejected(JsonRpcResponse),
    /// The host aborted while the batch was running
    Aborted,
}

/// Runs the elements of a batch body
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchProcessor {
    mode: BatchMode,
    max_size: Option<usize>,
}

impl BatchProcessor {
    #[cfg(test)]
    pub(crate) fn new(mode: BatchMode) -> Self {
        Self { mode, max_size: None }
    }

    pub(crate) fn with_limit(mode: BatchMode, max_size: Option<usize>) -> Self {
        Self { mode, max_size }
    }

    #[tracing::instrument(skip(self, elements, pipeline, env), fields(batch_size = elements.len(), mode = ?self.mode))]
    pub(crate) async fn process_batch(
        &self,
        elements: Vec<Value>,
        pipeline: &Pipeline,
        env: &CallEnvironment,
    ) -> BatchOutcome {
        if let Some(max_size) = self.max_size {
            if elements.len() > max_size {
                tracing::warn!(
                    batch_size = elements.len(),
                    max_size = max_size,
                    "Batch size exceeded"
                );
                let error = Error::BatchSizeExceeded {
                    limit: max_size,
                    actual: elements.len(),
                };
                return match pipeline.reject(&error, Id::Null) {
                    CallOutcome::Respond { response, .. } => BatchOutcome::Rejected(response),
                    _ => BatchOutcome::Responses(Vec::new()),
                };
            }
        }

        if let Some(metrics) = pipeline.metrics() {
            metrics.record_batch(elements.len() as u64, self.mode.as_str());
        }

        let outcomes = match self.mode {
            BatchMode::Parallel => {
                let calls = elements.into_iter().map(|raw| pipeline.execute(raw, env));
                futures::future::join_all(calls).await
            }
            BatchMode::Sequential => {
                let mut outcomes = Vec::with_capacity(elements.len());
                for raw in elements {
                    let outcome = pipeline.execute(raw, env).await;
                    let aborted = matches!(outcome, CallOutcome::Aborted);
                    outcomes.push(outcome);
                    if aborted {
                        break;
                    }
                }
                outcomes
            }
        };

        let mut responses = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                CallOutcome::Respond { response, .. } => responses.push(response),
                CallOutcome::Silent | CallOutcome::AlreadyWritten => {}
                CallOutcome::Aborted => return BatchOutcome::Aborted,
            }
        }

        tracing::debug!(response_count = responses.len(), "Batch processing completed");
        BatchOutcome::Responses(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfiguration;
    use crate::context::ServiceProvider;
    use crate::descriptor::{ExposedService, MethodMetadata, ParameterInfo, ReturnShape};
    use crate::error_mapper::ErrorMapper;
    use crate::invoker::{Activation, MethodInvoker};
    use crate::registry::MethodRegistry;
    use crate::transport::{AbortSignal, CallerIdentity};
    use rpcflow_core::Result;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<String>>,
    }

    impl ExposedService for Journal {
        fn service_name() -> &'static str {
            "Journal"
        }

        fn methods() -> Vec<MethodMetadata> {
            vec![
                MethodMetadata::new(
                    "echo",
                    ReturnShape::SyncValue,
                    MethodInvoker::sync_value(|_: &Journal, mut args, _| args.take::<Value>(0)),
                )
                .param(ParameterInfo::wire::<Value>(0, "value")),
                MethodMetadata::new(
                    "record",
                    ReturnShape::SyncVoid,
                    MethodInvoker::sync_void(|journal: &Journal, mut args, _| {
                        let entry = args.take::<String>(0)?;
                        if let Ok(mut entries) = journal.entries.lock() {
                            entries.push(entry);
                        }
                        Ok(())
                    }),
                )
                .param(ParameterInfo::wire::<String>(0, "entry")),
                MethodMetadata::new(
                    "entries",
                    ReturnShape::SyncValue,
                    MethodInvoker::sync_value(|journal: &Journal, _, _| -> Result<Vec<String>> {
                        Ok(journal
                            .entries
                            .lock()
                            .map(|entries| entries.clone())
                            .unwrap_or_default())
                    }),
                ),
            ]
        }
    }

    fn pipeline() -> Pipeline {
        let api = ApiConfiguration::new();
        api.expose_as("", Activation::shared(Journal::default()));
        Pipeline::new(
            Arc::new(MethodRegistry::from_configuration("/rpc", &api).unwrap()),
            ErrorMapper::new(),
            Arc::new(ServiceProvider::new()),
            None,
        )
    }

    fn env() -> CallEnvironment {
        CallEnvironment {
            route: "/rpc".to_string(),
            caller: Arc::new(CallerIdentity::anonymous()),
            sink: None,
            abort: AbortSignal::never(),
        }
    }

    fn responses(outcome: BatchOutcome) -> Vec<JsonRpcResponse> {
        match outcome {
            BatchOutcome::Responses(responses) => responses,
            other => panic!("expected responses, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_mode_default() {
        assert_eq!(BatchMode::default(), BatchMode::Parallel);
    }

    #[tokio::test]
    async fn test_parallel_batch_preserves_order() {
        let processor = BatchProcessor::new(BatchMode::Parallel);
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "echo", "params": [1], "id": 1}),
            json!({"jsonrpc": "2.0", "method": "missing", "id": 2}),
            json!({"jsonrpc": "2.0", "method": "echo", "params": [3], "id": 3}),
        ];

        let responses = responses(processor.process_batch(batch, &pipeline(), &env()).await);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].result, Some(json!(1)));
        assert_eq!(responses[1].error.as_ref().unwrap().code, -32601);
        assert_eq!(responses[1].id, Id::Number(2));
        assert_eq!(responses[2].result, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_notifications_left_out() {
        let processor = BatchProcessor::new(BatchMode::Parallel);
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "record", "params": ["a"]}),
            json!({"jsonrpc": "2.0", "method": "echo", "params": ["b"], "id": "x"}),
            json!({"jsonrpc": "2.0", "method": "missing"}),
        ];

        let responses = responses(processor.process_batch(batch, &pipeline(), &env()).await);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, Id::String("x".into()));
    }

    #[tokio::test]
    async fn test_all_notifications_produce_nothing() {
        let processor = BatchProcessor::new(BatchMode::Parallel);
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "record", "params": ["a"]}),
            json!({"jsonrpc": "2.0", "method": "record", "params": ["b"]}),
        ];

        let responses = responses(processor.process_batch(batch, &pipeline(), &env()).await);
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_batch_sees_earlier_effects() {
        let processor = BatchProcessor::new(BatchMode::Sequential);
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "record", "params": ["first"]}),
            json!({"jsonrpc": "2.0", "method": "record", "params": ["second"]}),
            json!({"jsonrpc": "2.0", "method": "entries", "id": 1}),
        ];

        let responses = responses(processor.process_batch(batch, &pipeline(), &env()).await);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].result, Some(json!(["first", "second"])));
    }

    #[tokio::test]
    async fn test_invalid_elements_answered_individually() {
        let processor = BatchProcessor::new(BatchMode::Parallel);
        let batch = vec![json!(1), json!({"jsonrpc": "2.0", "method": "echo", "params": [2], "id": 2})];

        let responses = responses(processor.process_batch(batch, &pipeline(), &env()).await);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].error.as_ref().unwrap().code, -32600);
        assert_eq!(responses[0].id, Id::Null);
        assert_eq!(responses[1].result, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_batch_size_limit() {
        let processor = BatchProcessor::with_limit(BatchMode::Parallel, Some(2));
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "echo", "params": [1], "id": 1}),
            json!({"jsonrpc": "2.0", "method": "echo", "params": [2], "id": 2}),
            json!({"jsonrpc": "2.0", "method": "echo", "params": [3], "id": 3}),
        ];

        match processor.process_batch(batch, &pipeline(), &env()).await {
            BatchOutcome::Rejected(response) => {
                assert_eq!(response.error.unwrap().code, -32600);
                assert_eq!(response.id, Id::Null);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_within_limit() {
        let processor = BatchProcessor::with_limit(BatchMode::Sequential, Some(2));
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "echo", "params": [1], "id": 1}),
            json!({"jsonrpc": "2.0", "method": "echo", "params": [2], "id": 2}),
        ];

        let responses = responses(processor.process_batch(batch, &pipeline(), &env()).await);
        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn test_aborted_batch_returns_nothing() {
        let processor = BatchProcessor::new(BatchMode::Parallel);
        let (handle, signal) = AbortSignal::new();
        handle.abort();
        let env = CallEnvironment {
            abort: signal,
            ..env()
        };
        let batch = vec![json!({"jsonrpc": "2.0", "method": "echo", "params": [1], "id": 1})];

        let outcome = processor.process_batch(batch, &pipeline(), &env).await;
        assert!(matches!(outcome, BatchOutcome::Aborted));
    }
}
