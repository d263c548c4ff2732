//!
//! SQL engines execute stored query text and hand back plain rows
//!
use async_trait::async_trait;
use aws_sdk_athena::error::DisplayErrorContext;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use serde_json::Value;
use tracing::log::*;

use std::time::{Duration, Instant};

use crate::{QueryError, QueryResult};

/// One result row, cells are strings or null
pub type Row = Vec<Value>;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, sql: &str) -> QueryResult<Vec<Row>>;
}

/// [QueryEngine] running queries with Amazon Athena
#[derive(Clone, Debug)]
pub struct AthenaEngine {
    client: aws_sdk_athena::Client,
    workgroup: String,
    database: Option<String>,
    output_location: Option<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl AthenaEngine {
    pub fn new(client: aws_sdk_athena::Client, workgroup: impl Into<String>) -> Self {
        Self {
            client,
            workgroup: workgroup.into(),
            database: None,
            output_location: None,
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    /// S3 location for result files, optional when the workgroup configures one
    pub fn with_output_location(mut self, location: Option<String>) -> Self {
        self.output_location = location;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn wait_for(&self, execution_id: &str) -> QueryResult<()> {
        let started = Instant::now();
        loop {
            let output = self
                .client
                .get_query_execution()
                .query_execution_id(execution_id)
                .send()
                .await
                .map_err(|e| QueryError::Execution(DisplayErrorContext(e).to_string()))?;

            let status = output.query_execution().and_then(|q| q.status());
            match status.and_then(|s| s.state()) {
                Some(QueryExecutionState::Succeeded) => return Ok(()),
                Some(state @ (QueryExecutionState::Failed | QueryExecutionState::Cancelled)) => {
                    let reason = status
                        .and_then(|s| s.state_change_reason())
                        .unwrap_or("no reason given");
                    return Err(QueryError::Execution(format!(
                        "{execution_id} ended as {}: {reason}",
                        state.as_str()
                    )));
                }
                state => trace!("{execution_id} is {state:?}"),
            }

            if started.elapsed() > self.timeout {
                return Err(QueryError::Execution(format!(
                    "{execution_id} did not finish within {:?}",
                    self.timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl QueryEngine for AthenaEngine {
    async fn execute(&self, sql: &str) -> QueryResult<Vec<Row>> {
        let context = self
            .database
            .as_ref()
            .map(|db| QueryExecutionContext::builder().database(db).build());
        let results = self
            .output_location
            .as_ref()
            .map(|loc| ResultConfiguration::builder().output_location(loc).build());

        let started = self
            .client
            .start_query_execution()
            .query_string(sql)
            .work_group(&self.workgroup)
            .set_query_execution_context(context)
            .set_result_configuration(results)
            .send()
            .await
            .map_err(|e| QueryError::Execution(DisplayErrorContext(e).to_string()))?;

        let execution_id = started
            .query_execution_id()
            .ok_or_else(|| QueryError::Execution("no query execution id returned".into()))?
            .to_string();
        debug!("Started query execution {execution_id}");

        self.wait_for(&execution_id).await?;

        let mut pages = self
            .client
            .get_query_results()
            .query_execution_id(&execution_id)
            .into_paginator()
            .send();

        let mut rows = vec![];
        let mut header = true;
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|e| QueryError::Execution(DisplayErrorContext(e).to_string()))?;
            let Some(result_set) = page.result_set() else {
                continue;
            };
            for row in result_set.rows() {
                // The first row of the first page holds the column names
                if header {
                    header = false;
                    continue;
                }
                rows.push(
                    row.data()
                        .iter()
                        .map(|datum| match datum.var_char_value() {
                            Some(value) => Value::String(value.to_string()),
                            None => Value::Null,
                        })
                        .collect(),
                );
            }
        }
        info!("Query execution {execution_id} returned {} rows", rows.len());
        Ok(rows)
    }
}
