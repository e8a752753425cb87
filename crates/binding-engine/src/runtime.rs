//! Asynchronous query runs
//!
//! Queries are entities whose `config` property is evaluated like any
//! other and handed to a [`QueryRunner`]. The runtime publishes
//! `isLoading`, `data` and `error` back into the engine as plain values,
//! so widgets bind to query state through ordinary expressions:
//!
//! ```text
//! {{ queries.users.isLoading ? "Loading" : queries.users.data.length }}
//! ```
//!
//! Only the latest run of a query may publish; older responses and
//! responses for queries removed in the meantime are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::{BindingEngine, PassReport};
use crate::error::{EngineError, Result};
use crate::events::{EvaluationEvent, EventSink};
use crate::types::{EntityId, EntityKind};

/// Evaluated request handed to the runner
pub const CONFIG_PROPERTY: &str = "config";
/// Response of the last successful run
pub const DATA_PROPERTY: &str = "data";
/// Whether a run is in flight
pub const LOADING_PROPERTY: &str = "isLoading";
/// Message of the last failed run, `null` after a success
pub const ERROR_PROPERTY: &str = "error";

/// Executes query requests
///
/// Implemented by the host (HTTP client, database driver, mock).
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Run one request; errors are reported as messages
    async fn run(&self, query_id: &str, request: Value) -> std::result::Result<Value, String>;
}

/// What happened to a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Results were written to the query's properties
    Published,
    /// A newer run of the same query started; results dropped
    Superseded,
    /// The query no longer exists; results dropped
    Removed,
}

/// Handle of a spawned run
pub struct QueryRun {
    pub run_id: String,
    handle: JoinHandle<QueryOutcome>,
}

impl QueryRun {
    /// Wait for the run to finish and its results to be applied
    pub async fn wait(self) -> Result<QueryOutcome> {
        self.handle
            .await
            .map_err(|e| EngineError::Query(format!("query task failed: {}", e)))
    }
}

/// Latest run id per query
type LatestRuns = Arc<Mutex<HashMap<EntityId, String>>>;

/// Drives query runs against a shared engine
pub struct QueryRuntime {
    engine: Arc<Mutex<BindingEngine>>,
    runner: Arc<dyn QueryRunner>,
    event_sink: Arc<dyn EventSink>,
    latest: LatestRuns,
}

impl QueryRuntime {
    pub fn new(
        engine: Arc<Mutex<BindingEngine>>,
        runner: Arc<dyn QueryRunner>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            runner,
            event_sink,
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The shared engine
    pub fn engine(&self) -> Arc<Mutex<BindingEngine>> {
        self.engine.clone()
    }

    /// Start a run of `query_id`
    ///
    /// Evaluates the query's config, publishes `isLoading = true` (any
    /// previous `data` stays visible) and spawns the runner. A config that
    /// fails to evaluate is not sent; its error is published instead.
    pub async fn run_query(&self, query_id: &str) -> Result<QueryRun> {
        let run_id = Uuid::new_v4().to_string();
        let request = {
            let mut engine = self.engine.lock().await;
            match engine.entity_kind(query_id) {
                Some(EntityKind::Query) => {}
                Some(_) => {
                    return Err(EngineError::WrongEntityKind {
                        id: query_id.to_string(),
                        expected: EntityKind::Query.to_string(),
                    })
                }
                None => return Err(EngineError::UnknownEntity(query_id.to_string())),
            }

            let config = engine.evaluated_value(query_id, CONFIG_PROPERTY);
            if let Some(error) = config.as_ref().and_then(|c| c.error.clone()) {
                engine.batch(|engine| {
                    engine.set_external_value(query_id, ERROR_PROPERTY, Value::String(error.to_string()))?;
                    engine.set_external_value(query_id, LOADING_PROPERTY, Value::Bool(false))?;
                    Ok(())
                })?;
                return Err(EngineError::Query(format!(
                    "config of '{}' failed to evaluate: {}",
                    query_id, error
                )));
            }

            engine.set_external_value(query_id, LOADING_PROPERTY, Value::Bool(true))?;
            self.latest
                .lock()
                .await
                .insert(query_id.to_string(), run_id.clone());
            config.map(|c| c.value).unwrap_or(Value::Null)
        };

        log::debug!("Query '{}' run {} started", query_id, run_id);
        let _ = self.event_sink.send(EvaluationEvent::QueryStarted {
            query_id: query_id.to_string(),
            run_id: run_id.clone(),
        });

        let completion = Completion {
            engine: self.engine.clone(),
            latest: self.latest.clone(),
            event_sink: self.event_sink.clone(),
            query_id: query_id.to_string(),
            run_id: run_id.clone(),
        };
        let runner = self.runner.clone();
        let handle = tokio::spawn(async move {
            let response = runner.run(&completion.query_id, request).await;
            completion.apply(response).await
        });
        Ok(QueryRun { run_id, handle })
    }

    /// Remove a query and forget its pending run
    pub async fn remove_query(&self, query_id: &str) -> Vec<PassReport> {
        let mut engine = self.engine.lock().await;
        self.latest.lock().await.remove(query_id);
        engine.on_entity_removed(query_id)
    }
}

/// Everything a spawned run needs to publish its response
struct Completion {
    engine: Arc<Mutex<BindingEngine>>,
    latest: LatestRuns,
    event_sink: Arc<dyn EventSink>,
    query_id: EntityId,
    run_id: String,
}

impl Completion {
    async fn apply(self, response: std::result::Result<Value, String>) -> QueryOutcome {
        let mut engine = self.engine.lock().await;
        {
            let mut latest = self.latest.lock().await;
            if latest.get(&self.query_id) != Some(&self.run_id) {
                log::warn!(
                    "Dropping response of superseded run {} for query '{}'",
                    self.run_id,
                    self.query_id
                );
                return QueryOutcome::Superseded;
            }
            latest.remove(&self.query_id);
        }
        if engine.entity_kind(&self.query_id) != Some(EntityKind::Query) {
            log::warn!("Dropping response for removed query '{}'", self.query_id);
            return QueryOutcome::Removed;
        }

        let error = response.as_ref().err().cloned();
        let query_id = self.query_id.as_str();
        let published = engine.batch(|engine| {
            match response {
                Ok(data) => {
                    engine.set_external_value(query_id, DATA_PROPERTY, data)?;
                    engine.set_external_value(query_id, ERROR_PROPERTY, Value::Null)?;
                }
                // Stale data stays visible next to the error
                Err(message) => {
                    engine.set_external_value(query_id, ERROR_PROPERTY, Value::String(message))?;
                }
            }
            engine.set_external_value(query_id, LOADING_PROPERTY, Value::Bool(false))?;
            Ok(())
        });
        if let Err(e) = published {
            log::warn!("Failed to publish results of query '{}': {}", query_id, e);
        }

        log::debug!("Query '{}' run {} resolved", query_id, self.run_id);
        let _ = self.event_sink.send(EvaluationEvent::QueryResolved {
            query_id: self.query_id.clone(),
            run_id: self.run_id.clone(),
            error,
        });
        QueryOutcome::Published
    }
}
